use std::process;

use clap::Parser;
use tracing::error;
use upnpfuzz::config::{self, Args};

fn main() {
    tracing_subscriber::fmt().with_ansi(false).init();

    ctrlc::set_handler(|| {
        println!("exiting...");
        process::exit(0);
    })
    .expect("failed to install SIGINT handler");

    let args = Args::parse();
    if let Err(err) = config::run(args) {
        error!("{err}");
        process::exit(1);
    }
}
