use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use encounter_core::{
    ControlNode, EncounterError, FormDefinition, FormDefinitionProvider, Observation,
    TransformConfig,
};
use encounter_forms::{
    extract_notes, find_datatype_conflicts, form_to_observations, observations_to_form,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "encounter-cli",
    about = "Chuyển đổi giữa trạng thái form và danh sách observation."
)]
struct Args {
    /// Thư mục chứa định nghĩa form (`<form id>.json`).
    #[arg(short, long, default_value = "forms")]
    forms: PathBuf,

    /// File cấu hình JSON (TransformConfig).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cây control -> danh sách observation.
    Encode {
        #[arg(long)]
        form: String,
        #[arg(short, long)]
        input: PathBuf,
        /// Submitted form state, dùng để khôi phục ghi chú.
        #[arg(long)]
        state: Option<PathBuf>,
        /// Thời điểm ghi (RFC 3339), mặc định là hiện tại.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Danh sách observation -> cây control.
    Decode {
        #[arg(long)]
        form: String,
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Kiểm tra concept gắn với nhiều datatype.
    Lint {
        #[arg(long)]
        form: String,
    },
}

/// Provider đọc định nghĩa form từ thư mục cục bộ.
struct FileFormProvider {
    root: PathBuf,
}

impl FormDefinitionProvider for FileFormProvider {
    fn fetch(&self, form_id: &str) -> Result<FormDefinition, EncounterError> {
        let path = self.root.join(format!("{form_id}.json"));
        let data = std::fs::read_to_string(&path)
            .map_err(|_| EncounterError::MissingForm(form_id.to_string()))?;
        serde_json::from_str(&data).map_err(|err| EncounterError::Parse(err.to_string()))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("encounter=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let provider = FileFormProvider {
        root: args.forms.clone(),
    };
    let config = match &args.config {
        Some(path) => read_json::<TransformConfig>(path)?,
        None => TransformConfig::default(),
    };

    match args.command {
        Command::Encode {
            form,
            input,
            state,
            at,
        } => {
            let form = provider.fetch(&form)?;
            let controls: Vec<ControlNode> = read_json(&input)?;
            let mut observations =
                form_to_observations(&controls, &form, at.unwrap_or_else(Utc::now), &config);
            if let Some(state) = state {
                let state: serde_json::Value = read_json(&state)?;
                extract_notes(&state, &mut observations);
            }
            tracing::info!(form = %form.name, observations = observations.len(), "encoded");
            println!("{}", serde_json::to_string_pretty(&observations)?);
        }
        Command::Decode { form, input } => {
            let form = provider.fetch(&form)?;
            let observations: Vec<Observation> = read_json(&input)?;
            let controls = observations_to_form(&observations, &form);
            println!("{}", serde_json::to_string_pretty(&controls)?);
        }
        Command::Lint { form } => {
            let form = provider.fetch(&form)?;
            let conflicts = find_datatype_conflicts(&form.schema);
            for conflict in &conflicts {
                println!(
                    "{}: {}",
                    conflict.concept_id,
                    conflict.datatypes.join(", ")
                );
            }
            if !conflicts.is_empty() {
                anyhow::bail!(
                    "Form {} có {} concept gắn với nhiều datatype",
                    form.name,
                    conflicts.len()
                );
            }
            println!("Form {}: không có xung đột datatype", form.name);
        }
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Không đọc được file {:?}", path))?;
    serde_json::from_str(&data).with_context(|| format!("JSON không hợp lệ trong {:?}", path))
}
