use ragdb_text::Bm25;

#[test]
fn rare_term_outranks_common_term() {
    let corpus = [
        "rust ownership and borrowing",
        "rust async runtime",
        "rust macros",
        "python generators",
        "go channels",
    ];
    let scores = Bm25::default().score(&corpus, "borrowing");

    assert!(scores[0].score > 0.0);
    assert_eq!(scores[0].matched_terms, 1);
    assert!(scores[1..].iter().all(|s| s.score == 0.0 && s.matched_terms == 0));
}

#[test]
fn shorter_document_wins_on_equal_term_frequency() {
    let corpus = ["tokio runtime", "tokio runtime with many extra words padding the length", "serde", "clap", "rayon", "anyhow"];
    let scores = Bm25::default().score(&corpus, "tokio");
    assert!(scores[0].score > scores[1].score, "length normalisation favours the short doc");
}

#[test]
fn idf_follows_unsmoothed_formula() {
    // N = 4, term in 1 doc: idf = ln(3.5 / 1.5); single-token doc of average length.
    let corpus = ["alpha", "beta", "gamma", "delta"];
    let scores = Bm25::default().score(&corpus, "alpha");
    let expected = (3.5_f32 / 1.5).ln();
    assert!((scores[0].score - expected).abs() < 1e-5, "got {}", scores[0].score);
}

#[test]
fn term_in_most_documents_scores_negative() {
    let corpus = ["common a", "common b", "common c", "rare"];
    let scores = Bm25::default().score(&corpus, "common");
    assert!(scores[0].score < 0.0, "ln((4-3+0.5)/(3+0.5)) is negative");
    assert_eq!(scores[3].score, 0.0);
}

#[test]
fn empty_query_scores_nothing() {
    let scores = Bm25::default().score(&["some text"], "!!!");
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0].score, 0.0);
}
