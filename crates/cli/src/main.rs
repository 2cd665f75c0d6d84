use anyhow::{bail, Context};
use cdm_core::coding::CodingResult;
use cdm_core::edit_checks::{run_edit_checks, site_today, VitalsEntry};
use cdm_core::reconcile::ReconciliationRow;
use cdm_core::{
    export_csv, reconcile, CdmConfig, CodingDictionary, ColumnPair, RawConfig, ReconcileSpec,
    Reconciliation, SideLabels, Table,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cdm")]
#[command(about = "Clinical data management workbench CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the eCRF specification
    Crf {
        /// Print as YAML instead of a table
        #[arg(long)]
        yaml: bool,
    },
    /// Run the vitals edit checks
    CheckVitals {
        /// Subject identifier
        subject: String,
        /// Systolic blood pressure (mmHg)
        systolic: i32,
        /// Diastolic blood pressure (mmHg)
        diastolic: i32,
        /// Visit date (YYYY-MM-DD)
        #[arg(long)]
        visit_date: Option<NaiveDate>,
        /// An adverse event was reported
        #[arg(long)]
        adverse_event: bool,
    },
    /// Reconcile a reference (EDC) file against an external (lab) file
    Reconcile {
        /// Reference dataset (CSV, TSV or a spreadsheet: xlsx, xls, ods)
        reference: PathBuf,
        /// External dataset (CSV, TSV or a spreadsheet: xlsx, xls, ods)
        external: PathBuf,
        /// Key column, `NAME` or `REFERENCE_NAME=EXTERNAL_NAME`; repeat for a composite key
        #[arg(long = "key", value_parser = parse_column_pair, default_value = "SUBJID")]
        key: Vec<ColumnPair>,
        /// Column to compare on matched rows; same syntax as --key
        #[arg(long = "compare", value_parser = parse_column_pair)]
        compare: Vec<ColumnPair>,
        /// Field delimiter for delimited text (default: inferred from the file extension)
        #[arg(long)]
        delimiter: Option<char>,
        /// Label for the reference side
        #[arg(long)]
        reference_label: Option<String>,
        /// Label for the external side
        #[arg(long)]
        external_label: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Check captured imaging views against a protocol
    Checklist {
        /// Imaging target, e.g. "Chest X-ray"
        target: String,
        /// Captured view names
        captured: Vec<String>,
    },
    /// List the configured imaging protocols as YAML
    Protocols,
    /// Code a verbatim adverse event term
    Code {
        /// Verbatim term as reported
        verbatim: String,
    },
    /// Export the audit trail as CSV
    AuditExport {
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn parse_column_pair(value: &str) -> Result<ColumnPair, String> {
    let pair = match value.split_once('=') {
        Some((reference, external)) => ColumnPair::mapped(reference.trim(), external.trim()),
        None => ColumnPair::same(value.trim()),
    };
    if pair.reference.is_empty() || pair.external.is_empty() {
        return Err(format!("'{value}' is not a column name or NAME=NAME mapping"));
    }
    Ok(pair)
}

fn load_table(name: &str, path: &Path, delimiter: Option<u8>) -> anyhow::Result<Table> {
    let table = Table::from_path(name, path, delimiter)
        .with_context(|| format!("failed to load {name} table from {}", path.display()))?;
    tracing::debug!(
        "{name} table: {} rows, columns {}",
        table.len(),
        table.columns().join(", ")
    );
    Ok(table)
}

fn format_row(row: &ReconciliationRow, labels: &SideLabels) -> String {
    let mut line = format!("{:<24} {}", row.key.to_string(), row.status.describe(labels));
    for d in &row.discrepancies {
        line.push_str(&format!(
            "; {}: '{}' vs '{}'",
            d.reference_field, d.reference_value, d.external_value
        ));
    }
    line
}

fn print_reconciliation(result: &Reconciliation) {
    println!("{:<24} Status", "Key");
    for row in &result.rows {
        println!("{}", format_row(row, &result.labels));
    }
    let summary = &result.summary;
    println!();
    println!(
        "Match: {}, Missing in {}: {}, Missing in {}: {}",
        summary.matched,
        result.labels.external,
        summary.missing_in_external,
        result.labels.reference,
        summary.missing_in_reference
    );
    if summary.matched_with_discrepancies > 0 {
        println!(
            "Matched rows with discrepancies: {}",
            summary.matched_with_discrepancies
        );
    }
    if summary.duplicate_reference_rows + summary.duplicate_external_rows > 0 {
        println!(
            "Duplicate keys ignored: {} in {}, {} in {}",
            summary.duplicate_reference_rows,
            result.labels.reference,
            summary.duplicate_external_rows,
            result.labels.external
        );
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("cdm=warn".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = CdmConfig::from_env_values(RawConfig::from_process_env())?;

    match cli.command {
        Some(Commands::Crf { yaml }) => {
            let crf = cdm_core::crf::CrfSpecification::default_v1();
            if yaml {
                print!("{}", crf.to_yaml()?);
            } else {
                println!("eCRF version {}", crf.version);
                for field in &crf.fields {
                    println!(
                        "{:<8} {:<24} {:<8} {}",
                        field.variable,
                        field.label,
                        format!("{:?}", field.field_type),
                        field.validation
                    );
                }
            }
        }
        Some(Commands::CheckVitals {
            subject,
            systolic,
            diastolic,
            visit_date,
            adverse_event,
        }) => {
            let entry = VitalsEntry {
                subject_id: subject,
                visit_date,
                systolic_bp: systolic,
                diastolic_bp: diastolic,
                adverse_event,
            };
            let today = site_today();
            tracing::debug!("checking vitals for {} against {today}", entry.subject_id);
            let report = run_edit_checks(&entry, today);
            if report.is_clean() {
                println!("All edit checks passed.");
            }
            for finding in &report.findings {
                println!(
                    "[{:?}] {} {}: {}",
                    finding.severity, finding.code, finding.field, finding.message
                );
            }
            if report.blocks_submission() {
                tracing::warn!("vitals for {} blocked", entry.subject_id);
                bail!("{} edit check error(s); entry cannot be submitted", report.error_count());
            }
        }
        Some(Commands::Reconcile {
            reference,
            external,
            key,
            compare,
            delimiter,
            reference_label,
            external_label,
            json,
        }) => {
            let delimiter = match delimiter {
                Some(c) if c.is_ascii() => Some(c as u8),
                Some(c) => bail!("delimiter '{c}' is not a single-byte character"),
                None => None,
            };
            let labels = SideLabels::new(
                reference_label.unwrap_or_else(|| config.labels().reference.clone()),
                external_label.unwrap_or_else(|| config.labels().external.clone()),
            );
            let reference = load_table(&labels.reference, &reference, delimiter)?;
            let external = load_table(&labels.external, &external, delimiter)?;

            let spec = ReconcileSpec::new(key)?
                .with_compare(compare)
                .with_labels(labels);
            let result = reconcile(&reference, &external, &spec)?;
            tracing::info!(
                "reconciled {} rows ({} matched)",
                result.rows.len(),
                result.summary.matched
            );

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_reconciliation(&result);
            }
        }
        Some(Commands::Checklist { target, captured }) => {
            let protocol = config.load_imaging_protocol()?;
            let report = protocol.evaluate(&target, &captured)?;
            for item in &report.items {
                println!("[{}] {}", if item.present { "x" } else { " " }, item.name);
            }
            if !report.unexpected.is_empty() {
                println!("Not in protocol: {}", report.unexpected.join(", "));
            }
            if report.is_complete() {
                println!("{}: protocol complete", report.target);
            } else {
                println!("{}: missing {}", report.target, report.missing.join(", "));
            }
        }
        Some(Commands::Protocols) => {
            print!("{}", config.load_imaging_protocol()?.render()?);
        }
        Some(Commands::Code { verbatim }) => {
            let dictionary = CodingDictionary::builtin()?;
            match dictionary.code(&verbatim) {
                CodingResult::Coded {
                    verbatim,
                    term,
                    version,
                } => {
                    println!("Verbatim: {verbatim}");
                    println!("LLT: {}", term.llt);
                    println!("PT: {}", term.pt);
                    println!("SOC: {}", term.soc);
                    println!("MedDRA {version}");
                }
                CodingResult::Uncoded { verbatim } => {
                    println!("No dictionary match for '{verbatim}'; manual coding required.");
                }
            }
        }
        Some(Commands::AuditExport { output }) => {
            if config.audit_log_path().is_none() {
                bail!("no audit log configured; set CDM_AUDIT_LOG");
            }
            let store = config.open_audit_store()?;
            let entries = store.entries()?;
            let csv = export_csv(&entries)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, csv)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    tracing::info!(
                        "exported {} audit entries to {}",
                        entries.len(),
                        path.display()
                    );
                    println!("Wrote audit trail to {}", path.display());
                }
                None => print!("{csv}"),
            }
        }
        None => {
            println!("Use 'cdm --help' for commands");
        }
    }

    Ok(())
}
