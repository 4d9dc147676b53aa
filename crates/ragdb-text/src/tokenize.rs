use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer, TokenStream};

/// Lowercased runs of alphanumeric characters, in text order.
pub fn tokenize(text: &str) -> Vec<String> {
	let mut analyzer = TextAnalyzer::builder(SimpleTokenizer::default()).filter(LowerCaser).build();
	let mut stream = analyzer.token_stream(text);
	let mut tokens = Vec::new();
	while stream.advance() {
		tokens.push(stream.token().text.clone());
	}
	tokens
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn splits_on_punctuation_and_lowercases() {
		assert_eq!(tokenize("Hello, World! rust-2024"), vec!["hello", "world", "rust", "2024"]);
		assert!(tokenize("  ...  ").is_empty());
	}
}
