//! CLI for dense passage retrieval over question/answer data.

// CLI binaries need to print user-facing output
#![allow(
    clippy::print_stdout,
    reason = "CLI binary needs stdout for user output"
)]

use eyre::WrapErr as _;

const DEFAULT_REPO: &str = "Xenova/electra-small-discriminator";
const REPO_MODEL_FILE: &str = "onnx/model.onnx";
const REPO_TOKENIZER_FILE: &str = "tokenizer.json";

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match args.command {
        Command::Retrieve {
            data,
            title,
            body,
            k,
            json,
            model,
        } => {
            retrieve(&data, &title, &body, k, json, &model)?;
        }
        Command::Evaluate {
            data,
            k,
            batch_size,
            sample_size,
            json,
            model,
        } => {
            evaluate(&data, k, batch_size, sample_size, json, &model)?;
        }
    }

    Ok(())
}

use clap::Parser as _;

#[derive(clap::Parser)]
#[command(name = "dpr")]
#[command(about = "Dense passage retrieval - dual-encoder question answering search and evaluation")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Retrieve the best answers for a question
    Retrieve {
        /// Data directory containing answers.json
        #[arg(short, long)]
        data: std::path::PathBuf,

        /// Question title
        #[arg(short, long)]
        title: String,

        /// Question body
        #[arg(short, long, default_value = "")]
        body: String,

        /// Number of answers to return
        #[arg(short, default_value = "10")]
        k: usize,

        /// Output JSON with indices, scores and answers
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Evaluate retrieval on the validation split
    Evaluate {
        /// Data directory containing validation.json and answers.json
        #[arg(short, long)]
        data: std::path::PathBuf,

        /// Cut-off for retrieval and recall
        #[arg(short, default_value = "10")]
        k: usize,

        /// Questions per in-batch loss batch
        #[arg(long, default_value = "8")]
        batch_size: usize,

        /// Only evaluate the first N validation records
        #[arg(long)]
        sample_size: Option<usize>,

        /// Output the full report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        model: ModelArgs,
    },
}

#[derive(clap::Args)]
struct ModelArgs {
    /// HuggingFace repository providing onnx/model.onnx and tokenizer.json
    #[arg(long, default_value = DEFAULT_REPO)]
    repo: String,

    /// Local ONNX model for the question tower (overrides --repo)
    #[arg(long, requires = "tokenizer")]
    model: Option<std::path::PathBuf>,

    /// Local ONNX model for the answer tower (defaults to the question tower)
    #[arg(long)]
    answer_model: Option<std::path::PathBuf>,

    /// Local tokenizer.json (overrides --repo)
    #[arg(long)]
    tokenizer: Option<std::path::PathBuf>,

    /// Hidden size of the encoder
    #[arg(long, default_value = "256")]
    hidden_dim: usize,

    /// Maximum tokens per question or answer
    #[arg(long, default_value = "64")]
    max_length: usize,

    /// Use the CoreML execution provider when available
    #[arg(long)]
    coreml: bool,
}

impl ModelArgs {
    fn encode_config(&self, batch_size: usize) -> dpr_encode::EncodeConfig {
        dpr_encode::EncodeConfig {
            max_length: self.max_length,
            batch_size,
        }
    }
}

/// Question and answer towers of the dual encoder.
struct Towers {
    question: dpr_encode::OnnxEncoder,
    answer: dpr_encode::OnnxEncoder,
}

/// Load both towers from local files or the HuggingFace Hub.
fn load_towers(args: &ModelArgs) -> eyre::Result<Towers> {
    let (model_path, tokenizer_path) = match (&args.model, &args.tokenizer) {
        (Some(model), Some(tokenizer)) => (model.clone(), tokenizer.clone()),
        _ => download_model(&args.repo)?,
    };
    let answer_model_path = args.answer_model.clone().unwrap_or_else(|| model_path.clone());

    let provider = if args.coreml {
        dpr_encode::ExecutionProvider::CoreML
    } else {
        dpr_encode::ExecutionProvider::CpuOnly
    };

    let question = dpr_encode::OnnxEncoder::load_with_provider(
        &model_path,
        &tokenizer_path,
        args.hidden_dim,
        provider,
    )
    .wrap_err("failed to load question encoder")?;
    let answer = dpr_encode::OnnxEncoder::load_with_provider(
        &answer_model_path,
        &tokenizer_path,
        args.hidden_dim,
        provider,
    )
    .wrap_err("failed to load answer encoder")?;

    Ok(Towers { question, answer })
}

fn download_model(repo_id: &str) -> eyre::Result<(std::path::PathBuf, std::path::PathBuf)> {
    use hf_hub::api::sync::Api;

    eprintln!("Loading encoder from {repo_id}...");

    let api = Api::new().wrap_err("failed to create HuggingFace API client")?;
    let repo = api.model(repo_id.to_string());

    let model_path = repo
        .get(REPO_MODEL_FILE)
        .wrap_err_with(|| format!("failed to download {REPO_MODEL_FILE}"))?;
    let tokenizer_path = repo
        .get(REPO_TOKENIZER_FILE)
        .wrap_err_with(|| format!("failed to download {REPO_TOKENIZER_FILE}"))?;

    Ok((model_path, tokenizer_path))
}

/// JSON output for one retrieved answer.
#[derive(serde::Serialize)]
struct JsonHit<'a> {
    rank: usize,
    index: usize,
    score: f32,
    answer: &'a str,
}

fn retrieve(
    data: &std::path::Path,
    title: &str,
    body: &str,
    k: usize,
    json: bool,
    model: &ModelArgs,
) -> eyre::Result<()> {
    let pool = dpr_data::AnswerPool::from_json_file(&data.join(dpr_data::ANSWERS_FILE))
        .wrap_err("failed to load answer pool")?;
    if pool.is_empty() {
        eyre::bail!("answer pool in {} is empty", data.display());
    }

    let mut towers = load_towers(model)?;
    let config = model.encode_config(dpr_encode::EncodeConfig::default().batch_size);

    eprintln!("Embedding {} answers...", pool.len());
    let passages = dpr_encode::embed_passages(&mut towers.answer, &pool.as_strs(), config)
        .wrap_err("failed to embed answer pool")?;
    let query = dpr_encode::embed_questions(&mut towers.question, &[title], &[body], config)
        .wrap_err("failed to embed question")?;

    let retrieved = dpr_score::top_k(query.view(), passages.view(), Some(k))
        .wrap_err("retrieval failed")?;
    let selected = dpr_score::select_by_indices(&retrieved.indices, pool.answers())
        .wrap_err("failed to map retrieved indices to answers")?;

    let (indices, scores) = retrieved
        .rows()
        .next()
        .ok_or_else(|| eyre::eyre!("no retrieval result for the question"))?;
    let hits: Vec<JsonHit<'_>> = indices
        .iter()
        .zip(scores)
        .zip(&selected[0])
        .enumerate()
        .map(|(rank, ((&index, &score), answer))| JsonHit {
            rank: rank + 1,
            index,
            score,
            answer,
        })
        .collect();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&hits).wrap_err("failed to serialize JSON")?
        );
    } else {
        for hit in &hits {
            println!("{}. [{}] {:.4}: {}", hit.rank, hit.index, hit.score, hit.answer);
        }
    }

    Ok(())
}

fn evaluate(
    data: &std::path::Path,
    k: usize,
    batch_size: usize,
    sample_size: Option<usize>,
    json: bool,
    model: &ModelArgs,
) -> eyre::Result<()> {
    let mut dataset = dpr_data::QaDataset::load(data).wrap_err("failed to load dataset")?;
    if let Some(n) = sample_size {
        dataset = dataset.sample(n);
    }
    if dataset.validation.is_empty() {
        eyre::bail!("validation split in {} is empty", data.display());
    }

    let true_indices = dataset
        .answers
        .true_indices(&dataset.validation)
        .wrap_err("validation answers must all appear in the answer pool")?;

    let mut towers = load_towers(model)?;
    let config = model.encode_config(batch_size);
    let validation = dataset.validation.as_batch();

    eprintln!("Embedding {} validation pairs...", validation.len());
    let questions = dpr_encode::embed_questions(
        &mut towers.question,
        &validation.titles,
        &validation.bodies,
        config,
    )
    .wrap_err("failed to embed validation questions")?;
    let paired_answers =
        dpr_encode::embed_passages(&mut towers.answer, &validation.answers, config)
            .wrap_err("failed to embed validation answers")?;

    let mean_loss = in_batch_loss(&questions, &paired_answers, batch_size)?;
    tracing::info!(mean_loss, "in-batch contrastive loss");

    eprintln!("Embedding {} pool answers...", dataset.answers.len());
    let pool = dpr_encode::embed_passages(&mut towers.answer, &dataset.answers.as_strs(), config)
        .wrap_err("failed to embed answer pool")?;

    let device = dpr_score::ScoreDevice::default();
    let retrieved = device
        .top_k(questions.view(), pool.view(), Some(k))
        .wrap_err("retrieval failed")?;

    let report = dpr_metrics::EvaluationReport::compute(&retrieved.indices, &true_indices, k)
        .wrap_err("failed to compute ranking metrics")?
        .with_loss(mean_loss);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).wrap_err("failed to serialize JSON")?
        );
    } else {
        println!("{report}");
    }

    Ok(())
}

/// Mean in-batch contrastive loss over consecutive batches of aligned pairs.
fn in_batch_loss(
    questions: &dpr_core::Embedding,
    answers: &dpr_core::Embedding,
    batch_size: usize,
) -> eyre::Result<f32> {
    let batch_size = batch_size.max(1);
    let num_pairs = questions.nrows();

    let mut total = 0.0_f32;
    let mut num_batches = 0_usize;

    for start in (0..num_pairs).step_by(batch_size) {
        let end = (start + batch_size).min(num_pairs);
        let q = questions.slice(ndarray::s![start..end, ..]);
        let a = answers.slice(ndarray::s![start..end, ..]);

        let scores = dpr_score::similarity(q, a)
            .wrap_err_with(|| format!("failed to score batch {start}..{end}"))?;
        let loss = dpr_score::contrastive_loss(scores.view(), None)
            .wrap_err_with(|| format!("failed to compute loss for batch {start}..{end}"))?;

        tracing::debug!(start, end, loss, "batch loss");
        total += loss;
        num_batches += 1;
    }

    if num_batches == 0 {
        eyre::bail!("no question/answer pairs to compute a loss over");
    }
    Ok(total / num_batches as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_batch_loss_aligned_pairs() {
        // Strongly aligned pairs: loss should be tiny in every batch
        let questions = ndarray::Array2::<f32>::eye(5) * 30.0;
        let answers = ndarray::Array2::<f32>::eye(5);
        let loss = in_batch_loss(&questions, &answers, 2).unwrap();
        assert!(loss < 1e-6, "loss was {loss}");
    }

    #[test]
    fn test_in_batch_loss_uniform() {
        // Identical embeddings everywhere: every batch contributes ln(batch len)
        let questions = ndarray::Array2::<f32>::ones((4, 3));
        let answers = ndarray::Array2::<f32>::ones((4, 3));
        let loss = in_batch_loss(&questions, &answers, 2).unwrap();
        assert!((loss - 2.0_f32.ln()).abs() < 1e-5, "loss was {loss}");
    }

    #[test]
    fn test_in_batch_loss_empty() {
        let empty = ndarray::Array2::<f32>::zeros((0, 3));
        assert!(in_batch_loss(&empty, &empty, 4).is_err());
    }

    #[test]
    fn test_cli_parses() {
        let args = Args::try_parse_from([
            "dpr", "evaluate", "--data", "data/qa", "-k", "5", "--sample-size", "100",
        ])
        .unwrap();
        match args.command {
            Command::Evaluate {
                k,
                sample_size,
                batch_size,
                model,
                ..
            } => {
                assert_eq!(k, 5);
                assert_eq!(sample_size, Some(100));
                assert_eq!(batch_size, 8);
                assert_eq!(model.repo, DEFAULT_REPO);
                assert_eq!(model.max_length, 64);
            }
            Command::Retrieve { .. } => panic!("expected evaluate"),
        }
    }

    #[test]
    fn test_cli_model_requires_tokenizer() {
        let result = Args::try_parse_from([
            "dpr", "retrieve", "--data", "d", "--title", "q", "--model", "m.onnx",
        ]);
        assert!(result.is_err());
    }
}
