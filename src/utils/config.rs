#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use log::{info, error, LevelFilter};
use serde::Deserialize;
use std::{env, fs, path::Path};
use fs_mistrust::Mistrust;
use std::os::unix::fs::PermissionsExt;
use lazy_static::lazy_static;
use structopt::StructOpt;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;

// Hello Utilities
use crate::utils::errors::Errors;
use crate::utils::hello_utils::get_absolute_path;

// ***************************************************************************
//                                Constants
// ***************************************************************************
// Directory and file locations. Unless otherwise noted, all files and directories
// are relative to the root directory.
const ENV_HELLO_ROOT_DIR   : &str = "HELLO_ROOT_DIR";
const ENV_HELLO_LOGS_DIR   : &str = "HELLO_LOGS_DIR"; // set for log4rs.yml
const DEFAULT_ROOT_DIR     : &str = "~/.hello";
const CONFIG_DIR           : &str = "/config";
const LOGS_DIR             : &str = "/logs";
const CERTS_DIR            : &str = "/certs";
const LOG4RS_CONFIG_FILE   : &str = "/log4rs.yml"; // relative to config dir
const HELLO_CONFIG_FILE    : &str = "/hello.toml"; // relative to config dir
pub const TLS_KEY_FILE     : &str = "/key.pem";    // relative to certs dir
pub const TLS_CERT_FILE    : &str = "/cert.pem";   // relative to certs dir

// Networking.
const DEFAULT_BIND_ADDR    : &str = "0.0.0.0";
const DEFAULT_HTTP_PORT    : u16  = 8080;

// Used when no log4rs.yml is installed.
const CONSOLE_LOG_PATTERN  : &str = "{d(%Y-%m-%dT%H:%M:%S%.3f%Z)} {l} {t} - {m}{n}";

// ***************************************************************************
//                             Static Variables
// ***************************************************************************
// Assign the command line arguments BEFORE RUNTIME_CTX is initialized in main.
lazy_static! {
    pub static ref HELLO_ARGS: HelloArgs = init_hello_args();
}

// Calculate the data directories BEFORE RUNTIME_CTX is initialized in main.
lazy_static! {
    pub static ref HELLO_DIRS: HelloDirs = init_hello_dirs();
}

// ***************************************************************************
//                             Directory Structs
// ***************************************************************************
// ---------------------------------------------------------------------------
// HelloDirs:
// ---------------------------------------------------------------------------
#[derive(Debug)]
pub struct HelloDirs {
    pub root_dir: String,
    pub config_dir: String,
    pub logs_dir: String,
    pub certs_dir: String,
}

// ***************************************************************************
//                               Config Structs
// ***************************************************************************
// ---------------------------------------------------------------------------
// HelloArgs:
// ---------------------------------------------------------------------------
#[derive(Debug, StructOpt)]
#[structopt(name = "hello_server", about = "Command line arguments for the Hello Server.")]
pub struct HelloArgs {
    /// Specify the server's root data directory.
    ///
    /// This directory contains the config, logs and certs subdirectories.
    #[structopt(short, long)]
    pub root_dir: Option<String>,

    /// Create the data directories and then exit.
    ///
    /// The data directories will be rooted at a root directory calculated
    /// using the following priority order:
    ///
    ///   1. If set, the value of the HELLO_ROOT_DIR environment,
    ///
    ///   2. Otherwise, if set, the value of the --root-dir command line argument,
    ///
    ///   3. Otherwise, ~/.hello
    ///
    #[structopt(short, long)]
    pub create_dirs_only: bool,
}

// ---------------------------------------------------------------------------
// Parms:
// ---------------------------------------------------------------------------
#[derive(Debug)]
#[allow(dead_code)]
pub struct Parms {
    pub config_file: String,
    pub config: Config,
}

// ---------------------------------------------------------------------------
// RuntimeCtx:
// ---------------------------------------------------------------------------
#[derive(Debug)]
#[allow(dead_code)]
pub struct RuntimeCtx {
    pub parms: Parms,
    pub hello_args: &'static HelloArgs,
    pub hello_dirs: &'static HelloDirs,
}

// ---------------------------------------------------------------------------
// Config:
// ---------------------------------------------------------------------------
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub title: String,
    pub bind_addr: String,
    pub http_port: u16,
    pub tls: bool,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: "Hello Server".to_string(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            tls: false,
        }
    }
}

// ***************************************************************************
//                            Directory Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_hello_args:
// ---------------------------------------------------------------------------
/** Get the command line arguments. */
fn init_hello_args() -> HelloArgs {
    let args = HelloArgs::from_args();
    println!("{:?}", args);
    args
}

// ---------------------------------------------------------------------------
// init_hello_dirs:
// ---------------------------------------------------------------------------
/** Calculate the external data directories, creating any that are missing.
 * The server cannot run without them, so any failure here is fatal.
 */
fn init_hello_dirs() -> HelloDirs {
    match resolve_hello_dirs(&get_root_dir()) {
        Ok(dirs) => dirs,
        Err(e) => panic!("{}", e),
    }
}

// ---------------------------------------------------------------------------
// resolve_hello_dirs:
// ---------------------------------------------------------------------------
fn resolve_hello_dirs(root_dir: &str) -> Result<HelloDirs> {
    let mistrust = get_mistrust()?;

    let root_dir = root_dir.to_string();
    check_hello_dir(&root_dir, "root directory", &mistrust)?;

    let config_dir = root_dir.clone() + CONFIG_DIR;
    check_hello_dir(&config_dir, "config directory", &mistrust)?;

    let logs_dir = root_dir.clone() + LOGS_DIR;
    check_hello_dir(&logs_dir, "logs directory", &mistrust)?;

    let certs_dir = root_dir.clone() + CERTS_DIR;
    check_hello_dir(&certs_dir, "certs directory", &mistrust)?;

    Ok(HelloDirs { root_dir, config_dir, logs_dir, certs_dir })
}

// ---------------------------------------------------------------------------
// check_hello_dir:
// ---------------------------------------------------------------------------
/** Check that the path is absolute and, if it exists, that it is a directory
 * with 0o700 permissions.  Missing directories are created by mistrust,
 * which uses 0o700.
 */
fn check_hello_dir(dir: &str, msgname: &str, mistrust: &Mistrust) -> Result<()> {
    let path = Path::new(dir);
    if !path.is_absolute() {
        return Err(anyhow!(Errors::DirectoryError(format!("({}) must be absolute: {}", msgname, dir))));
    }

    if path.exists() {
        if !path.is_dir() {
            return Err(anyhow!(Errors::DirectoryError(format!("({}) must be a directory: {}", msgname, dir))));
        }
        let perm = path.metadata().map_err(Errors::IOError)?.permissions().mode();
        if perm & 0o777 != 0o700 {
            return Err(anyhow!(Errors::DirectoryError(format!("({}) must have 0o700 permissions: {}", msgname, dir))));
        }
    } else if let Err(e) = mistrust.make_directory(path) {
        return Err(anyhow!(Errors::DirectoryError(format!("({}) could not be created: {}: {}", msgname, dir, e))));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// get_mistrust:
// ---------------------------------------------------------------------------
/** Configure a new mistrust object for initial directory processing. */
fn get_mistrust() -> Result<Mistrust> {
    Mistrust::builder()
        .ignore_prefix(get_absolute_path("~"))
        .trust_group(0)
        .build()
        .map_err(|e| anyhow!("Mistrust configuration error: {}", e))
}

// ---------------------------------------------------------------------------
// get_root_dir:
// ---------------------------------------------------------------------------
fn get_root_dir() -> String {
    // Order of precedence:
    //  1. Environment variable
    //  2. Command line --root-dir argument
    //  3. Default location
    //
    let root_dir = env::var(ENV_HELLO_ROOT_DIR).unwrap_or_else(
        |_| {
            match HELLO_ARGS.root_dir.clone() {
                Some(r) => r,
                None => DEFAULT_ROOT_DIR.to_string(),
            }
        });

    get_absolute_path(&root_dir)
}

// ***************************************************************************
//                               Log Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_log:
// ---------------------------------------------------------------------------
/** Initialize log4rs from the config directory's log4rs.yml if one is
 * installed, otherwise log to the console at info level.
 */
pub fn init_log() {
    export_logs_dir(&HELLO_DIRS.logs_dir);
    let logconfig = init_log_config();
    let (result, source) = if Path::new(&logconfig).is_file() {
        (log4rs::init_file(&logconfig, Default::default()), logconfig)
    } else {
        let result = console_log_config()
            .and_then(|c| log4rs::init_config(c).map(|_| ()).map_err(|e| anyhow!(e)));
        (result, "console defaults".to_string())
    };

    if let Err(e) = result {
        println!("{}", e);
        panic!("{}", Errors::Log4rsInitialization(source));
    }
    info!("Log4rs initialized using: {}", source);
}

// ---------------------------------------------------------------------------
// export_logs_dir:
// ---------------------------------------------------------------------------
/** Publish the logs directory so log4rs.yml can place files with
 * $ENV{HELLO_LOGS_DIR}.  Called before the logger and any worker reads
 * the environment.
 */
fn export_logs_dir(logs_dir: &str) {
    env::set_var(ENV_HELLO_LOGS_DIR, logs_dir);
}

// ---------------------------------------------------------------------------
// init_log_config:
// ---------------------------------------------------------------------------
fn init_log_config() -> String {
    HELLO_DIRS.config_dir.clone() + LOG4RS_CONFIG_FILE
}

// ---------------------------------------------------------------------------
// console_log_config:
// ---------------------------------------------------------------------------
fn console_log_config() -> Result<LogConfig> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(CONSOLE_LOG_PATTERN)))
        .build();

    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))?;
    Ok(config)
}

// ***************************************************************************
//                             Parms Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// get_parms:
// ---------------------------------------------------------------------------
/** Retrieve the application parameters from hello.toml in the config
 * directory.  Defaults are used when the file cannot be read; a file that
 * exists but does not parse is an error.
 */
fn get_parms(config_dir: &str) -> Result<Parms> {
    let config_file = get_absolute_path(&(config_dir.to_string() + HELLO_CONFIG_FILE));
    info!("{}", Errors::ReadingConfigFile(config_file.clone()));

    let contents = match fs::read_to_string(&config_file) {
        Ok(c) => c,
        Err(_) => {
            println!("Unable to read configuration at {}. Using default values.", config_file);
            return Ok(Parms { config_file: Default::default(), config: Config::new() });
        }
    };

    let config = parse_config(&contents, &config_file)?;
    Ok(Parms { config_file, config })
}

// ---------------------------------------------------------------------------
// parse_config:
// ---------------------------------------------------------------------------
fn parse_config(contents: &str, config_file: &str) -> Result<Config> {
    match toml::from_str(contents) {
        Ok(c)  => Ok(c),
        Err(e) => {
            let msg = format!("{}\n   {}", Errors::TOMLParseError(config_file.to_string()), e);
            error!("{}", msg);
            Err(anyhow!(msg))
        }
    }
}

// ***************************************************************************
//                             Config Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_runtime_context:
// ---------------------------------------------------------------------------
pub fn init_runtime_context() -> RuntimeCtx {
    // The application aborts if the configuration can't be read.
    let parms = match get_parms(&HELLO_DIRS.config_dir) {
        Ok(p) => p,
        Err(e) => panic!("FAILED to read configuration file: {}", e),
    };
    RuntimeCtx {parms, hello_args: &HELLO_ARGS, hello_dirs: &HELLO_DIRS}
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn scratch_dir(name: &str) -> String {
        let dir = env::temp_dir().join(format!("hello_server_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir.to_string_lossy().into_owned()
    }

    fn mode_of(dir: &str) -> u32 {
        fs::metadata(dir).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let dir = scratch_dir("noconfig");
        fs::create_dir_all(&dir).unwrap();

        let parms = get_parms(&dir).unwrap();
        assert_eq!(parms.config, Config::default());
        assert!(parms.config_file.is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn config_file_is_read_from_config_dir() {
        let dir = scratch_dir("withconfig");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.clone() + HELLO_CONFIG_FILE, "title = \"Greeter\"\n").unwrap();

        let parms = get_parms(&dir).unwrap();
        assert_eq!(parms.config.title, "Greeter");
        assert_eq!(parms.config.http_port, 8080);
        assert_eq!(parms.config_file, dir.clone() + HELLO_CONFIG_FILE);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_dirs_are_created_owner_only() {
        let root = scratch_dir("dirs");

        let dirs = resolve_hello_dirs(&root).unwrap();
        assert_eq!(dirs.root_dir, root);
        assert_eq!(dirs.config_dir, root.clone() + CONFIG_DIR);
        assert_eq!(dirs.logs_dir, root.clone() + LOGS_DIR);
        assert_eq!(dirs.certs_dir, root.clone() + CERTS_DIR);
        for dir in [&dirs.root_dir, &dirs.config_dir, &dirs.logs_dir, &dirs.certs_dir] {
            assert!(Path::new(dir).is_dir());
            assert_eq!(mode_of(dir), 0o700);
        }

        // Existing directories with the right permissions are accepted.
        assert!(resolve_hello_dirs(&root).is_ok());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn logs_dir_is_exported() {
        export_logs_dir("/var/tmp/hello/logs");
        assert_eq!(env::var(ENV_HELLO_LOGS_DIR).unwrap(), "/var/tmp/hello/logs");
    }

    #[test]
    fn default_config() {
        let config = Config::new();
        assert_eq!(config.title, "Hello Server");
        assert_eq!(config.bind_addr, "0.0.0.0");
        assert_eq!(config.http_port, 8080);
        assert!(!config.tls);
    }

    #[test]
    fn full_config_parses() {
        let toml = r#"
            title = "Greeter"
            bind_addr = "127.0.0.1"
            http_port = 3000
            tls = true
        "#;
        let config = parse_config(toml, "hello.toml").unwrap();
        assert_eq!(config, Config {
            title: "Greeter".to_string(),
            bind_addr: "127.0.0.1".to_string(),
            http_port: 3000,
            tls: true,
        });
    }

    #[test]
    fn partial_config_takes_defaults() {
        let config = parse_config("http_port = 9090\n", "hello.toml").unwrap();
        assert_eq!(config.http_port, 9090);
        assert_eq!(config.title, "Hello Server");
        assert!(!config.tls);
    }

    #[test]
    fn malformed_config_is_rejected() {
        let err = parse_config("http_port = \"not a port\"\n", "/etc/hello.toml").unwrap_err();
        assert!(err.to_string().starts_with("Unable to parse TOML file: /etc/hello.toml"));
    }

    #[test]
    fn relative_dir_is_rejected() {
        let mistrust = get_mistrust().unwrap();
        let err = check_hello_dir("relative/dir", "root directory", &mistrust).unwrap_err();
        assert!(err.to_string().contains("must be absolute"));
    }

    #[test]
    fn open_permissions_are_rejected() {
        let dir = scratch_dir("perms");
        fs::create_dir_all(&dir).unwrap();
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();

        let mistrust = get_mistrust().unwrap();
        let err = check_hello_dir(&dir, "root directory", &mistrust).unwrap_err();
        assert!(err.to_string().contains("0o700"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn file_is_not_a_directory() {
        let dir = scratch_dir("file");
        fs::write(&dir, "not a dir").unwrap();

        let mistrust = get_mistrust().unwrap();
        let err = check_hello_dir(&dir, "root directory", &mistrust).unwrap_err();
        assert!(err.to_string().contains("must be a directory"));
        fs::remove_file(&dir).unwrap();
    }
}
