#[macro_use]
extern crate log;

use chan_signal::Signal;
use std::process;
use std::sync::Arc;
use telemeter::collector::http::HttpFrontEnd;
use telemeter::collector::rpc::{RpcFrontEnd, RpcServer};
use telemeter::collector::{self, Collector};
use telemeter::config::{self, TransportKind};
use telemeter::http::Server;
use telemeter::logging;
use telemeter::thread::Stop;

enum Listener {
    Http(Server),
    Rpc(RpcServer),
}

impl Listener {
    fn join(self) {
        match self {
            Listener::Http(server) => server.join(),
            Listener::Rpc(server) => server.join(),
        }
    }
}

fn main() {
    // Must precede any thread spawn so every thread inherits the mask.
    let signal = chan_signal::notify(&[Signal::INT, Signal::TERM]);

    let args = match config::parse_collector_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    if let Err(e) = logging::setup(args.verbose) {
        eprintln!("could not set up logging: {}", e);
        process::exit(1);
    }
    info!("telemeter-collector - {}", args.version);

    let collector = Arc::new(Collector::from_config(args));
    let restored = collector.restore_at_startup();
    if restored > 0 {
        info!("restored {} metrics", restored);
    }

    let stop = Stop::new();
    let address = collector.config().address.clone();
    let listener = match collector.config().transport {
        TransportKind::Http => Server::new(
            &address,
            collector.config().workers,
            HttpFrontEnd::new(Arc::clone(&collector)),
            stop.clone(),
        )
        .map(Listener::Http),
        TransportKind::Rpc => RpcServer::new(
            &address,
            RpcFrontEnd::new(Arc::clone(&collector)),
            stop.clone(),
        )
        .map(Listener::Rpc),
    };
    let listener = match listener {
        Ok(listener) => listener,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let backup_loop = match Collector::spawn_backup_loop(&collector, stop.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            error!("unable to start backup loop: {}", e);
            process::exit(1);
        }
    };

    if let Some(sig) = signal.recv() {
        info!("received {:?}, shutting down", sig);
    }
    stop.raise();
    listener.join();
    if let Some(handle) = backup_loop {
        handle.join();
    }

    match collector.backup() {
        Ok(n) => info!("final backup wrote {} metrics", n),
        Err(e) => error!("final backup failed: {}", e),
    }
    info!("{}", collector::counters_summary());
}
