//! Question/answer datasets for dual-encoder retrieval.
//!
//! A data directory holds up to three JSON files:
//! - `validation.json`: array of question/answer records
//! - `answers.json`: the answer pool that retrieval ranks against
//! - `train.json` (optional): training records in the same layout

use eyre::WrapErr as _;

pub const TRAIN_FILE: &str = "train.json";
pub const VALIDATION_FILE: &str = "validation.json";
pub const ANSWERS_FILE: &str = "answers.json";

/// One question paired with its accepted answer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QaRecord {
    #[serde(rename = "QuestionTitle")]
    pub question_title: String,
    #[serde(rename = "QuestionBody", default)]
    pub question_body: String,
    #[serde(rename = "Answer")]
    pub answer: String,
}

#[derive(serde::Deserialize)]
struct AnswerRecord {
    #[serde(rename = "Answer")]
    answer: String,
}

/// An ordered list of question/answer pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QaSplit {
    records: Vec<QaRecord>,
}

impl QaSplit {
    /// Wrap records in a split.
    #[must_use]
    pub fn new(records: Vec<QaRecord>) -> Self {
        Self { records }
    }

    /// Load a split from a JSON array of records.
    pub fn from_json_file(path: &std::path::Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let records: Vec<QaRecord> = serde_json::from_str(&content)
            .wrap_err_with(|| format!("failed to parse {}", path.display()))?;

        tracing::info!(path = %path.display(), records = records.len(), "loaded split");
        Ok(Self { records })
    }

    /// Keep only the first `n` records.
    #[must_use]
    pub fn sample(mut self, n: usize) -> Self {
        self.records.truncate(n);
        self
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the split is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, in file order.
    #[must_use]
    pub fn records(&self) -> &[QaRecord] {
        &self.records
    }

    /// Consecutive batches of at most `batch_size` records.
    ///
    /// The last batch may be shorter. A zero batch size is treated as 1.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = QaBatch<'_>> {
        self.records.chunks(batch_size.max(1)).map(QaBatch::new)
    }

    /// The whole split as a single batch.
    #[must_use]
    pub fn as_batch(&self) -> QaBatch<'_> {
        QaBatch::new(&self.records)
    }
}

/// Column view over a slice of records, ready for the two encoder towers.
#[derive(Debug, Clone)]
pub struct QaBatch<'a> {
    pub titles: Vec<&'a str>,
    pub bodies: Vec<&'a str>,
    pub answers: Vec<&'a str>,
}

impl<'a> QaBatch<'a> {
    fn new(records: &'a [QaRecord]) -> Self {
        Self {
            titles: records.iter().map(|r| r.question_title.as_str()).collect(),
            bodies: records.iter().map(|r| r.question_body.as_str()).collect(),
            answers: records.iter().map(|r| r.answer.as_str()).collect(),
        }
    }

    /// Number of question/answer pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.titles.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

/// The candidate passages retrieval ranks against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerPool {
    answers: Vec<String>,
    positions: std::collections::HashMap<String, usize>,
}

impl AnswerPool {
    /// Build a pool; duplicate answers resolve to their first position.
    #[must_use]
    pub fn new(answers: Vec<String>) -> Self {
        let mut positions = std::collections::HashMap::with_capacity(answers.len());
        for (idx, answer) in answers.iter().enumerate() {
            positions.entry(answer.clone()).or_insert(idx);
        }
        Self { answers, positions }
    }

    /// Load a pool from a JSON array of `{"Answer": ...}` records.
    pub fn from_json_file(path: &std::path::Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let records: Vec<AnswerRecord> = serde_json::from_str(&content)
            .wrap_err_with(|| format!("failed to parse {}", path.display()))?;

        tracing::info!(path = %path.display(), answers = records.len(), "loaded answer pool");
        Ok(Self::new(records.into_iter().map(|r| r.answer).collect()))
    }

    /// Number of answers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.answers.len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    /// Answers as string slices, in pool order.
    #[must_use]
    pub fn as_strs(&self) -> Vec<&str> {
        self.answers.iter().map(String::as_str).collect()
    }

    /// All answers.
    #[must_use]
    pub fn answers(&self) -> &[String] {
        &self.answers
    }

    /// Position of an answer in the pool.
    #[must_use]
    pub fn index_of(&self, answer: &str) -> Option<usize> {
        self.positions.get(answer).copied()
    }

    /// Ground-truth pool index for every record of a split.
    ///
    /// Fails if any record's answer is missing from the pool.
    pub fn true_indices(&self, split: &QaSplit) -> eyre::Result<Vec<usize>> {
        split
            .records()
            .iter()
            .enumerate()
            .map(|(row, record)| {
                self.index_of(&record.answer).ok_or_else(|| {
                    tracing::warn!(row, "answer missing from pool");
                    eyre::eyre!("answer of record {row} is not in the answer pool")
                })
            })
            .collect()
    }
}

/// The files of a data directory.
#[derive(Debug, Clone)]
pub struct QaDataset {
    /// `None` when the directory has no `train.json`.
    pub train: Option<QaSplit>,
    pub validation: QaSplit,
    pub answers: AnswerPool,
}

impl QaDataset {
    /// Load `validation.json` and `answers.json` from `dir`, plus
    /// `train.json` when present.
    pub fn load(dir: &std::path::Path) -> eyre::Result<Self> {
        let train_path = dir.join(TRAIN_FILE);
        let train = if train_path.exists() {
            Some(QaSplit::from_json_file(&train_path).wrap_err("failed to load training split")?)
        } else {
            tracing::debug!(dir = %dir.display(), "no training split");
            None
        };
        let validation = QaSplit::from_json_file(&dir.join(VALIDATION_FILE))
            .wrap_err("failed to load validation split")?;
        let answers = AnswerPool::from_json_file(&dir.join(ANSWERS_FILE))
            .wrap_err("failed to load answer pool")?;

        Ok(Self {
            train,
            validation,
            answers,
        })
    }

    /// Truncate both splits to their first `n` records.
    #[must_use]
    pub fn sample(self, n: usize) -> Self {
        Self {
            train: self.train.map(|split| split.sample(n)),
            validation: self.validation.sample(n),
            answers: self.answers,
        }
    }
}
