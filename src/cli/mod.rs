use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use crate::backends::archive::DEFAULT_TAR_COMMAND;
use crate::backends::mysqldump::DEFAULT_DUMP_COMMAND;
use crate::coordinator::RunContext;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long, env = "SITE_BACKUP_VERBOSE")]
    pub verbose: Option<LevelFilter>,

    /// Configuration file, YAML if it ends in `.yaml` or `.yml`, TOML otherwise.
    #[arg(long, short = 'c', env = "SITE_BACKUP_CONFIG", default_value = "config.toml")]
    pub config: PathBuf,

    /// Directory archives are staged in before the upload.
    #[arg(long, env = "SITE_BACKUP_DIR", default_value = "backups")]
    pub backup_dir: PathBuf,

    /// PID file preventing concurrent runs.
    #[arg(long, env = "SITE_BACKUP_LOCK_FILE", default_value = "backup.lock")]
    pub lock_file: PathBuf,

    /// File every log line is appended to.
    #[arg(long, env = "SITE_BACKUP_LOG_FILE", default_value = "backup.log")]
    pub log_file: PathBuf,

    /// Executable used to dump site databases.
    #[arg(long, env = "SITE_BACKUP_DUMP_COMMAND", default_value = DEFAULT_DUMP_COMMAND)]
    pub dump_command: PathBuf,

    /// Executable used to archive sites.
    #[arg(long, env = "SITE_BACKUP_TAR_COMMAND", default_value = DEFAULT_TAR_COMMAND)]
    pub tar_command: PathBuf,
}

impl Cli {
    pub fn context(&self) -> RunContext {
        RunContext {
            config_path: self.config.clone(),
            backup_dir: self.backup_dir.clone(),
            lock_path: self.lock_file.clone(),
            dump_program: self.dump_command.clone(),
            tar_program: self.tar_command.clone(),
        }
    }
}
