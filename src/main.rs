//! The display process. Started by the game process with a pipe on stdin; draws whatever comes
//! down it until told to stop or the pipe closes.

use std::sync::Arc;

use mls::{
    config::Environment,
    context::{self, Startup},
    host::DetachedHost,
    ipc,
};

fn main() {
    let env = Environment::from_env();

    if !env.ipc_client {
        eprintln!("mls-ipc-client is started by the game. It can't be run by itself.");
        std::process::exit(2);
    }

    // The game process starts us inside the run directory.
    let run_dir = std::env::current_dir().unwrap_or_default();
    let config_dir = env.ipc_config_dir.clone().unwrap_or_else(|| run_dir.clone());

    let host = DetachedHost::new(env.ipc_variant(), run_dir, config_dir);
    let context = context::start(Startup::new(Arc::new(host)).with_environment(env));

    let stdin = std::io::stdin();
    let mut reader = stdin.lock();

    if ipc::client::run(&mut reader, context.screen()).is_err() {
        std::process::exit(1);
    }
}
