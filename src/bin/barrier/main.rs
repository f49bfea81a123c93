use rendezvous_rust::{CancelToken, RendezvousBarrier, Result, SyncError, WaitOptions};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber;
use tracing::{info, error};
use clap::Parser;
use futures::future::join_all;

fn party(id: usize, barrier: RendezvousBarrier, rounds: usize, options: WaitOptions) -> usize {
    let mut passed = 0;
    for round in 0..rounds {
        info!("party-{} round {} task completed", id, round);
        match barrier.arrive_and_wait_with(&options) {
            Ok(arrival) => {
                info!("party-{} released from generation {} as #{}", id, arrival.generation(), arrival.index());
                passed += 1;
            }
            Err(SyncError::BrokenBarrier) => {
                error!("party-{} round {}: another party gave up", id, round);
            }
            Err(e) => {
                error!("party-{} round {}: {}", id, round, e);
            }
        }
    }
    passed
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Options {
    /// parties per generation
    #[clap(short, long)]
    #[clap(default_value_t = 3)]
    parties: usize,

    /// generations each party takes part in
    #[clap(short, long)]
    #[clap(default_value_t = 1)]
    rounds: usize,

    /// per-party wait limit in milliseconds
    #[clap(short, long)]
    timeout_ms: Option<u64>,

    /// start one party fewer than the barrier expects
    #[clap(short, long)]
    straggler: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let options = Options::parse();
    let tripped = Arc::new(AtomicU64::new(0));
    let counter = tripped.clone();
    let barrier = RendezvousBarrier::with_action(options.parties, move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        info!("all tasks are ready ({} time(s))", n);
        Ok(())
    })?;

    let cancel = CancelToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling waiting parties");
            on_ctrl_c.cancel();
        }
    });

    let mut wait_options = WaitOptions::new().cancel_on(&cancel);
    if let Some(ms) = options.timeout_ms {
        wait_options = wait_options.timeout(Duration::from_millis(ms));
    }

    let started = if options.straggler { options.parties - 1 } else { options.parties };
    let tasks = (0..started).map(|id| {
        let barrier = barrier.clone();
        let wait_options = wait_options.clone();
        let rounds = options.rounds;
        tokio::task::spawn_blocking(move || party(id, barrier, rounds, wait_options))
    });

    let mut passed = 0;
    for result in join_all(tasks).await {
        passed += result?;
    }

    info!("{} release(s), barrier tripped {} time(s), generation {}",
          passed, tripped.load(Ordering::SeqCst), barrier.generation());

    Ok(())
}
