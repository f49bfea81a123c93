use rendezvous_rust::{CountdownGate, Result};
use std::thread;
use std::time::Duration;
use tracing_subscriber;
use tracing::{info, error};
use clap::Parser;
use rand::Rng;

fn worker(id: usize, gate: CountdownGate, max_delay_ms: u64) {
    // counts down even if the work below panics
    let _done = gate.signal_guard();

    info!("worker-{} is working", id);
    let delay = rand::thread_rng().gen_range(0..=max_delay_ms);
    thread::sleep(Duration::from_millis(delay));
    info!("worker-{} has finished after {}ms", id, delay);
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Options {
    /// number of worker threads
    #[clap(short, long)]
    #[clap(default_value_t = 3)]
    workers: usize,

    /// upper bound of each worker's simulated work
    #[clap(short, long)]
    #[clap(default_value_t = 1000)]
    max_delay_ms: u64,

    /// give up waiting after this many milliseconds
    #[clap(short, long)]
    timeout_ms: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let options = Options::parse();
    let gate = CountdownGate::new(options.workers)?;

    let mut handles = Vec::with_capacity(options.workers);
    for id in 0..options.workers {
        let gate = gate.clone();
        let max_delay_ms = options.max_delay_ms;
        handles.push(thread::spawn(move || worker(id, gate, max_delay_ms)));
    }

    match options.timeout_ms {
        Some(ms) => {
            if let Err(e) = gate.wait_timeout(Duration::from_millis(ms)) {
                error!("{} worker(s) still running: {}", gate.count(), e);
                return Err(e.into());
            }
        }
        None => gate.wait(),
    }
    info!("all workers have finished their tasks");

    for handle in handles {
        if handle.join().is_err() {
            error!("worker panicked");
        }
    }

    Ok(())
}
