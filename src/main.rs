//! The `confreg` shell.
//!
//! Registers the sections of a JSON schema file, finalizes them with an
//! optional configuration file and then applies the statements read from
//! standard input, one line at a time. Settings come from `confreg.toml`
//! (if present) and `CONFREG_*` environment variables.

use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader};

// used to read the shell settings from file and environment
use config::{Config, Environment, File as ConfigFile};
use serde::Deserialize;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use confreg::{ConfregError, ItemDef, ItemFlags, ListFormat, ListStyle, ReaderSource, Registry};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Settings {
    log_level: String,
    /// JSON file with the sections to register.
    schema: Option<String>,
    /// Statements applied while finalizing.
    config_file: Option<String>,
    history: bool,
    list_style: String,
    list_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            schema: None,
            config_file: None,
            history: false,
            list_style: "plain".into(),
            list_prefix: String::new(),
        }
    }
}

fn load_settings() -> Result<Settings, config::ConfigError> {
    Config::builder()
        .add_source(ConfigFile::with_name("confreg").required(false))
        .add_source(Environment::with_prefix("CONFREG"))
        .build()?
        .try_deserialize()
}

// ------------- Schema -------------
#[derive(Debug, Deserialize)]
struct Schema {
    sections: Vec<SectionSpec>,
}

#[derive(Debug, Deserialize)]
struct SectionSpec {
    name: Option<String>,
    items: Vec<ItemSpec>,
}

#[derive(Debug, Deserialize)]
struct ItemSpec {
    name: String,
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default = "single")]
    size: i64,
    initial: Option<String>,
    lower: Option<String>,
    upper: Option<String>,
    /// e.g. "require_data", "strict_bound"
    #[serde(default)]
    flags: Vec<String>,
}

fn single() -> i64 {
    1
}

impl ItemSpec {
    fn into_def(self) -> Result<ItemDef, String> {
        let mut flags = ItemFlags::empty();
        for name in &self.flags {
            flags |= ItemFlags::from_name(&name.to_ascii_uppercase())
                .filter(|f| ItemFlags::DECLARABLE.contains(*f))
                .ok_or_else(|| format!("Unknown flag '{}' of item '{}'", name, self.name))?;
        }
        let mut def = ItemDef::new(&self.name, &self.item_type, self.size).flags(flags);
        if let Some(initial) = &self.initial {
            def = def.initial(initial);
        }
        if let Some(lower) = &self.lower {
            def = def.lower(lower);
        }
        if let Some(upper) = &self.upper {
            def = def.upper(upper);
        }
        Ok(def)
    }
}

fn register_schema(registry: &mut Registry, path: &str) -> Result<(), Box<dyn Error>> {
    let schema: Schema = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    for section in schema.sections {
        let items = section
            .items
            .into_iter()
            .map(ItemSpec::into_def)
            .collect::<Result<Vec<_>, String>>()?;
        registry.register(items, section.name.as_deref())?;
    }
    Ok(())
}

fn run(settings: &Settings) -> Result<(), Box<dyn Error>> {
    let mut registry = Registry::new();
    if let Some(path) = &settings.schema {
        register_schema(&mut registry, path)?;
    }
    if settings.history {
        registry.enable_history()?;
    }
    registry.set_list_format(ListFormat {
        style: if settings.list_style.eq_ignore_ascii_case("latex") {
            ListStyle::Latex
        } else {
            ListStyle::Plain
        },
        prefix: settings.list_prefix.clone(),
    })?;

    let finalized = match &settings.config_file {
        Some(path) => match File::open(path) {
            Ok(file) => registry.finalize(Some(&mut ReaderSource::new(BufReader::new(file)))),
            Err(e) => {
                warn!(path = %path, error = %e, "Configuration file unreadable, using default configuration");
                registry.finalize(None)
            }
        },
        None => registry.finalize(None),
    };
    match finalized {
        Ok(()) => {}
        Err(ConfregError::Incomplete(problems)) => {
            warn!(problems = problems.len(), "Continuing with incomplete configuration");
        }
        Err(e) => return Err(e.into()),
    }

    let mut session = registry.session();
    for line in io::stdin().lock().lines() {
        if let Err(e) = session.apply_line(&line?) {
            eprintln!("{}", e);
        }
    }
    for entry in registry.history()? {
        info!("{}", entry);
    }
    Ok(())
}

fn main() {
    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Invalid confreg settings: {}", e);
            std::process::exit(2);
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .with_writer(io::stderr)
        .init();
    if let Err(e) = run(&settings) {
        error!(error = %e, "confreg stopped");
        std::process::exit(1);
    }
}
