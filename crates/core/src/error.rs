#[derive(Debug, thiserror::Error)]
pub enum CdmError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{table} table is missing required field '{field}'")]
    MissingRequiredField { table: String, field: String },
    #[error("{table} table row {row} has an empty key value in '{field}'")]
    MissingKeyValue {
        table: String,
        row: usize,
        field: String,
    },
    #[error("no imaging protocol for target '{0}'")]
    UnknownTarget(String),
    #[error("query not found: {0}")]
    QueryNotFound(String),
    #[error("query {id} cannot move from {from} to {to}")]
    InvalidQueryTransition {
        id: String,
        from: String,
        to: String,
    },
    #[error("submission blocked by {0} edit check error(s)")]
    SubmissionBlocked(usize),

    #[error("invalid text: {0}")]
    Text(#[from] cdm_types::TextError),
    #[error("failed to read delimited file: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to read spreadsheet: {0}")]
    Spreadsheet(calamine::Error),
    #[error("failed to write audit export: {0}")]
    CsvWrite(csv::IntoInnerError<csv::Writer<Vec<u8>>>),
    #[error("audit export is not valid UTF-8: {0}")]
    ExportEncoding(std::string::FromUtf8Error),
    #[error("failed to read file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to write file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to serialize JSON: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize JSON (line {line}): {source}")]
    Deserialization {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize YAML: {0}")]
    YamlSerialization(serde_yaml::Error),
    #[error("imaging protocol schema mismatch at {path}: {message}")]
    ProtocolSchema { path: String, message: String },
}

pub type CdmResult<T> = std::result::Result<T, CdmError>;
