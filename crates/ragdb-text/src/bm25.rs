//! Okapi BM25 over an in-memory corpus.
//!
//! The corpus is whatever rows a tenant scan returned, so scoring is a single
//! pass with no persistent index. IDF is `ln((N - n + 0.5) / (n + 0.5))`
//! without the `+1` smoothing, which makes terms present in more than half of
//! the corpus contribute negatively.

use std::collections::HashMap;

use crate::tokenize::tokenize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25 {
	pub k1: f32,
	pub b: f32,
}

impl Default for Bm25 {
	fn default() -> Self {
		Self { k1: 1.5, b: 0.75 }
	}
}

/// Score of one corpus document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Score {
	pub doc: usize,
	pub score: f32,
	/// Number of query terms found in the document.
	pub matched_terms: usize,
}

impl Bm25 {
	/// Score every document of `corpus` against `query`, in corpus order.
	pub fn score<S: AsRef<str>>(&self, corpus: &[S], query: &str) -> Vec<Bm25Score> {
		let query_terms = tokenize(query);
		let docs: Vec<Vec<String>> = corpus.iter().map(|d| tokenize(d.as_ref())).collect();
		if docs.is_empty() || query_terms.is_empty() {
			return (0..docs.len()).map(|doc| Bm25Score { doc, score: 0.0, matched_terms: 0 }).collect();
		}

		let n = docs.len() as f32;
		let total_len: usize = docs.iter().map(Vec::len).sum();
		let avgdl = if total_len == 0 { 1.0 } else { total_len as f32 / n };

		let freqs: Vec<HashMap<&str, u32>> = docs
			.iter()
			.map(|tokens| {
				let mut tf = HashMap::new();
				for t in tokens {
					*tf.entry(t.as_str()).or_insert(0) += 1;
				}
				tf
			})
			.collect();

		let mut idf: HashMap<&str, f32> = HashMap::new();
		for term in &query_terms {
			let df = freqs.iter().filter(|tf| tf.contains_key(term.as_str())).count();
			if df > 0 {
				let df = df as f32;
				idf.insert(term.as_str(), ((n - df + 0.5) / (df + 0.5)).ln());
			}
		}

		freqs
			.iter()
			.zip(&docs)
			.enumerate()
			.map(|(doc, (tf, tokens))| {
				let dl = tokens.len() as f32;
				let mut score = 0.0;
				let mut matched_terms = 0;
				for term in &query_terms {
					let Some(term_idf) = idf.get(term.as_str()) else { continue };
					let f = tf.get(term.as_str()).copied().unwrap_or(0) as f32;
					if f > 0.0 {
						matched_terms += 1;
					}
					score += term_idf * (f * (self.k1 + 1.0)) / (f + self.k1 * (1.0 - self.b + self.b * dl / avgdl));
				}
				Bm25Score { doc, score, matched_terms }
			})
			.collect()
	}
}
