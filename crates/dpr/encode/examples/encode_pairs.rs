//! Encode a few question/answer pairs and show in-batch scores.
//!
//! Expects an ONNX export and tokenizer under `models/electra-small/`.

use eyre::WrapErr as _;

const MODEL_DIR: &str = "models/electra-small";
const HIDDEN_DIM: usize = 256;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let model_path = format!("{MODEL_DIR}/model.onnx");
    let tokenizer_path = format!("{MODEL_DIR}/tokenizer.json");

    tracing::info!("Loading encoders...");
    let mut question_encoder =
        dpr_encode::OnnxEncoder::load(&model_path, &tokenizer_path, HIDDEN_DIM)?;
    let mut answer_encoder =
        dpr_encode::OnnxEncoder::load(&model_path, &tokenizer_path, HIDDEN_DIM)?;

    let titles = ["How do I reverse a list?", "How do I read a file?", "What is a closure?"];
    let bodies = ["In Python", "Line by line", ""];
    let answers = [
        "Use reversed() or slice with [::-1].",
        "Open it with a context manager and iterate over it.",
        "A function that captures variables from its enclosing scope.",
    ];

    let config = dpr_encode::EncodeConfig {
        max_length: 32,
        batch_size: 2,
    };

    let questions = dpr_encode::embed_questions(&mut question_encoder, &titles, &bodies, config)
        .wrap_err("failed to embed questions")?;
    let passages = dpr_encode::embed_passages(&mut answer_encoder, &answers, config)
        .wrap_err("failed to embed answers")?;
    tracing::info!(questions = ?questions.dim(), passages = ?passages.dim(), "embedded");

    let scores = dpr_score::similarity(questions.view(), passages.view())?;
    let loss = dpr_score::contrastive_loss(scores.view(), None)?;
    tracing::info!(?scores, loss, "in-batch scores");

    let retrieved = dpr_score::top_k(questions.view(), passages.view(), Some(2))?;
    let selected = dpr_score::select_by_indices(&retrieved.indices, &answers)?;
    for (title, top) in titles.iter().zip(&selected) {
        tracing::info!(?title, ?top, "top answers");
    }

    let true_indices: Vec<usize> = (0..titles.len()).collect();
    let report = dpr_metrics::EvaluationReport::compute(&retrieved.indices, &true_indices, 2)?
        .with_loss(loss);
    tracing::info!(mrr = report.mrr, recall = report.mean_recall_at_k, "evaluation");

    Ok(())
}
