#[macro_use]
extern crate log;

use chan_signal::Signal;
use std::process;
use std::sync::Arc;
use telemeter::agent::{self, Agent};
use telemeter::config;
use telemeter::logging;
use telemeter::thread::Stop;

fn main() {
    // Must precede any thread spawn so every thread inherits the mask.
    let signal = chan_signal::notify(&[Signal::INT, Signal::TERM]);

    let args = match config::parse_agent_args() {
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
    info!("telemeter-agent - {}", args.version);
    info!(
        "reporting to {} over {:?} every {:?}",
        args.address, args.transport, args.report_interval
    );

    let agent = match Agent::from_config(args) {
        Ok(agent) => Arc::new(agent),
        Err(e) => {
            error!("unable to start agent: {}", e);
            process::exit(1);
        }
    };

    let stop = Stop::new();
    let handles = match Agent::spawn(&agent, &stop) {
        Ok(handles) => handles,
        Err(e) => {
            error!("unable to start worker threads: {}", e);
            process::exit(1);
        }
    };

    if let Some(sig) = signal.recv() {
        info!("received {:?}, shutting down", sig);
    }
    stop.raise();
    for handle in handles {
        handle.join();
    }

    match agent.report() {
        Ok(n) => info!("final report delivered {} batches", n),
        Err(e) => warn!("final report failed: {}", e),
    }
    info!("{}", agent::counters_summary());
}
