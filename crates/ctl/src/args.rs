#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

pub(crate) const DEFAULT_STORAGE_DIR: &str = "./.agent_ops";
pub(crate) const ENV_STORAGE_DIR: &str = "AO_STORAGE_DIR";

/// Flags that take a value. `--evidence` may repeat.
const VALUE_FLAGS: &[&str] = &[
    "--before",
    "--by",
    "--comment",
    "--evidence",
    "--limit",
    "--proposal",
    "--reason",
    "--risk",
    "--scope",
    "--status",
];

pub(crate) fn usage() -> &'static str {
    "ao_ctl — review and execute agent-ops proposals\n\n\
USAGE:\n\
  ao_ctl [--storage-dir DIR] <command> [args]\n\n\
COMMANDS:\n\
  create <type> <payload-json> --by ACTOR [--reason TEXT] [--scope JSON]\n\
         [--evidence REF]... [--risk LEVEL]\n\
  approve <proposal> --by ACTOR [--comment TEXT]\n\
  reject <proposal> --by ACTOR [--comment TEXT]\n\
  cancel-proposal <proposal> --by ACTOR [--comment TEXT]\n\
  execute <proposal> --by ACTOR\n\
  retry <job> --by ACTOR\n\
  settle <job> --by ACTOR\n\
  rollback <job> --by ACTOR [--reason TEXT]\n\
  cancel <job> --by ACTOR [--reason TEXT]\n\
  proposals [--status S]\n\
  proposal <id>\n\
  jobs [--status S] [--proposal ID]\n\
  job <id>\n\
  rollback-job <id>\n\
  rollbacks <job>\n\
  audit <proposal> [--limit N] [--before SEQ]\n\
  stats\n\
  init-fleet\n\n\
NOTES:\n\
  - Storage defaults to ./.agent_ops (or AO_STORAGE_DIR).\n\
  - Engine settings come from AO_DEPLOYMENT_MODE, AO_AUTO_EXECUTE,\n\
    AO_AUTO_EXECUTE_MAX_RISK, AO_AUTO_EXECUTE_TYPES, AO_MAX_ATTEMPTS,\n\
    AO_WRITE_TIMEOUT_MS, AO_SETTLE_TIMEOUT_MS.\n\
  - Output is one JSON document on stdout; logs go to stderr (RUST_LOG).\n"
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CliArgs {
    pub(crate) storage_dir: PathBuf,
    pub(crate) command: String,
    pub(crate) positional: Vec<String>,
    flags: BTreeMap<String, Vec<String>>,
}

impl CliArgs {
    pub(crate) fn flag(&self, name: &str) -> Option<&str> {
        self.flags
            .get(name)
            .and_then(|values| values.last())
            .map(String::as_str)
    }

    pub(crate) fn flag_all(&self, name: &str) -> Vec<String> {
        self.flags.get(name).cloned().unwrap_or_default()
    }

    pub(crate) fn require_flag(&self, name: &str) -> Result<&str, String> {
        self.flag(name)
            .ok_or_else(|| format!("{} requires {name}", self.command))
    }

    pub(crate) fn arg(&self, idx: usize, what: &str) -> Result<&str, String> {
        self.positional
            .get(idx)
            .map(String::as_str)
            .ok_or_else(|| format!("{} requires <{what}>", self.command))
    }
}

/// `Ok(None)` means help was requested.
pub(crate) fn parse_args(
    args: Vec<String>,
    env_storage_dir: Option<String>,
) -> Result<Option<CliArgs>, String> {
    if args.iter().any(|a| a == "-h" || a == "--help") {
        return Ok(None);
    }

    let mut storage_dir = env_storage_dir
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);
    let mut command: Option<String> = None;
    let mut positional = Vec::new();
    let mut flags: BTreeMap<String, Vec<String>> = BTreeMap::new();

    let mut i = 0usize;
    while i < args.len() {
        let a = args[i].as_str();
        match a {
            "--storage-dir" => {
                i += 1;
                let v = args.get(i).ok_or("--storage-dir requires DIR")?;
                storage_dir = Some(PathBuf::from(v));
            }
            flag if flag.starts_with("--") => {
                if !VALUE_FLAGS.contains(&flag) {
                    return Err(format!("unknown flag {flag}"));
                }
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| format!("{flag} requires a value"))?;
                flags.entry(flag.to_string()).or_default().push(v.clone());
            }
            value => {
                if command.is_none() {
                    command = Some(value.to_string());
                } else {
                    positional.push(value.to_string());
                }
            }
        }
        i += 1;
    }

    let command = command.ok_or("missing command")?;
    Ok(Some(CliArgs {
        storage_dir: storage_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR)),
        command,
        positional,
        flags,
    }))
}
