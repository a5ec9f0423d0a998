#![forbid(unsafe_code)]

use lazy_static::lazy_static;
use log::info;
use poem::listener::{Listener, RustlsCertificate, RustlsConfig, TcpListener};
use poem::Server;

// Hello Utilities
use crate::api::{hello_routes, HELLO_VERSION};
use crate::utils::config::{init_log, init_runtime_context, RuntimeCtx, HELLO_ARGS, HELLO_DIRS,
                           TLS_CERT_FILE, TLS_KEY_FILE};
use crate::utils::errors::Errors;
use crate::utils::hello_utils::read_named_file;

// Modules
mod api;
mod utils;

// ***************************************************************************
//                                Constants
// ***************************************************************************
const SERVER_NAME : &str = "HelloServer"; // for poem logging

// ***************************************************************************
//                             Static Variables
// ***************************************************************************
// Lazily initialize the parameters variable so that is has a 'static lifetime.
// We exit if we can't read our parameters or data directories.
lazy_static! {
    static ref RUNTIME_CTX: RuntimeCtx = init_runtime_context();
}

// ---------------------------------------------------------------------------
// main:
// ---------------------------------------------------------------------------
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    // Announce ourselves.
    println!("Starting hello_server!");

    // Resolving the directories creates any that are missing.
    if HELLO_ARGS.create_dirs_only {
        println!("Data directories created under {}.", HELLO_DIRS.root_dir);
        return Ok(());
    }

    // Initialize the server.
    hello_init();

    // --------------- Main Loop Set Up ---------------
    let config = &RUNTIME_CTX.parms.config;
    let addr = format!("{}:{}", config.bind_addr, config.http_port);
    let app = hello_routes(&config.title);

    // Serve https when configured, otherwise plain http.
    let listener = TcpListener::bind(addr.clone());
    let listener = if config.tls {
        let certs_dir = &RUNTIME_CTX.hello_dirs.certs_dir;
        listener.rustls(
            RustlsConfig::new().fallback(
                RustlsCertificate::new()
                    .key(read_named_file(&(certs_dir.clone() + TLS_KEY_FILE))?)
                    .cert(read_named_file(&(certs_dir.clone() + TLS_CERT_FILE))?),
            ),
        ).boxed()
    } else {
        listener.boxed()
    };
    info!("{} listening on {} (tls={}).", SERVER_NAME, addr, config.tls);

    // ------------------ Main Loop -------------------
    Server::new(listener)
        .name(SERVER_NAME)
        .run(app)
        .await
}

// ***************************************************************************
//                             Private Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// hello_init:
// ---------------------------------------------------------------------------
/** Initialize logging and the runtime context before the listener is
 * configured.
 */
fn hello_init() {
    init_log();

    // Force the reading of input parameters and initialization of runtime context.
    info!("{}", Errors::InputParms(format!("{:#?}", *RUNTIME_CTX)));

    print_version_info();
}

// ---------------------------------------------------------------------------
// print_version_info:
// ---------------------------------------------------------------------------
fn print_version_info() {
    info!("\n*** Running HELLO={}, BRANCH={}, COMMIT={}, DIRTY={}, SRC_TS={}, RUSTC={}.",
          HELLO_VERSION,
          env!("GIT_BRANCH"),
          env!("GIT_COMMIT_SHORT"),
          env!("GIT_DIRTY"),
          env!("SOURCE_TIMESTAMP"),
          env!("RUSTC_VERSION"));
}
