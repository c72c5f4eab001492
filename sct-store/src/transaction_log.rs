use anyhow::{Context, Result};
use async_trait::async_trait;
use itertools::Itertools;
use mockall::automock;
use sct_domain::{DecodeError, Direction, Timestamp, Transaction};
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{event, Level};

pub const FIELD_DELIMITER: char = ';';
const NUM_FIELDS: usize = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLine {
    pub line_number: usize,
    pub error: DecodeError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedLog {
    /// newest-first, in file order
    pub transactions: Vec<Transaction>,
    pub skipped: Vec<SkippedLine>,
}

#[automock]
#[async_trait]
pub trait TransactionLogTrait: Send + Sync + Debug {
    async fn load(&self) -> Result<LoadedLog>;
    async fn save(&self, transactions: &[Transaction]) -> Result<()>;
}

/// Fields in fixed order: location, direction, commodity, price, quantity, saturation, timestamp.
/// A delimiter inside a field is not escaped, such a record will not load back.
pub fn encode_line(tx: &Transaction) -> String {
    [
        tx.location.clone(),
        tx.direction.to_string(),
        tx.commodity.clone(),
        tx.price.to_string(),
        tx.quantity.to_string(),
        tx.saturation.to_string(),
        tx.timestamp.0.clone(),
    ]
    .join(&FIELD_DELIMITER.to_string())
}

pub fn decode_line(line: &str) -> Result<Transaction, DecodeError> {
    let fields = line.split(FIELD_DELIMITER).collect_vec();

    let &[location, direction, commodity, price, quantity, saturation, timestamp] = fields.as_slice() else {
        return Err(DecodeError::FieldCount {
            expected: NUM_FIELDS,
            found: fields.len(),
        });
    };

    Ok(Transaction {
        location: text_field("location", location)?,
        direction: Direction::parse(direction)?,
        commodity: text_field("commodity", commodity)?,
        price: number_field("price", price)?,
        quantity: number_field("quantity", quantity)?,
        saturation: number_field("saturation", saturation)?,
        timestamp: Timestamp(text_field("timestamp", timestamp)?),
        shop: None,
    })
}

fn text_field(field: &'static str, value: &str) -> Result<String, DecodeError> {
    if value.trim().is_empty() {
        Err(DecodeError::EmptyField(field))
    } else {
        Ok(value.to_string())
    }
}

fn number_field(field: &'static str, value: &str) -> Result<f64, DecodeError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
        .ok_or_else(|| DecodeError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

/// Decodes a whole log. Blank lines are ignored, malformed lines are skipped and reported.
pub fn decode_log(content: &str) -> LoadedLog {
    let mut loaded = LoadedLog::default();

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match decode_line(line) {
            Ok(tx) => loaded.transactions.push(tx),
            Err(error) => loaded.skipped.push(SkippedLine { line_number: index + 1, error }),
        }
    }

    loaded
}

pub fn encode_log(transactions: &[Transaction]) -> String {
    transactions.iter().map(encode_line).join("\n")
}

/// `;`-delimited flat file, rewritten in full on every save.
#[derive(Debug, Clone)]
pub struct FileTransactionLog {
    path: PathBuf,
}

impl FileTransactionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut file_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        file_name.push(".tmp");
        self.path.with_file_name(file_name)
    }
}

#[async_trait]
impl TransactionLogTrait for FileTransactionLog {
    async fn load(&self) -> Result<LoadedLog> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                event!(Level::INFO, "No transaction log found at {}. Starting empty", self.path.display());
                return Ok(LoadedLog::default());
            }
            Err(err) => return Err(err).with_context(|| format!("Failed to read transaction log {}", self.path.display())),
        };

        let loaded = decode_log(&content);

        for skipped in loaded.skipped.iter() {
            event!(
                Level::WARN,
                "Skipping malformed line {} of {}: {}",
                skipped.line_number,
                self.path.display(),
                skipped.error
            );
        }

        Ok(loaded)
    }

    async fn save(&self, transactions: &[Transaction]) -> Result<()> {
        let temp_path = self.temp_path();

        tokio::fs::write(&temp_path, encode_log(transactions))
            .await
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace transaction log {}", self.path.display()))?;

        event!(Level::DEBUG, "Saved {} transactions to {}", transactions.len(), self.path.display());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTransactionLog {
    saved: RwLock<Vec<Transaction>>,
    fail_writes: AtomicBool,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transactions(transactions: Vec<Transaction>) -> Self {
        Self {
            saved: RwLock::new(transactions),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail_writes: bool) {
        self.fail_writes.store(fail_writes, Ordering::SeqCst);
    }

    pub async fn saved(&self) -> Vec<Transaction> {
        self.saved.read().await.clone()
    }
}

#[async_trait]
impl TransactionLogTrait for InMemoryTransactionLog {
    async fn load(&self) -> Result<LoadedLog> {
        Ok(LoadedLog {
            transactions: self.saved.read().await.clone(),
            skipped: vec![],
        })
    }

    async fn save(&self, transactions: &[Transaction]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("simulated write failure");
        }
        *self.saved.write().await = transactions.to_vec();
        Ok(())
    }
}
