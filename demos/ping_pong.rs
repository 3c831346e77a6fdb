//! Two logical threads playing ping-pong, once on kernel threads and once on the
//! cooperative fiber scheduler.

use std::sync::Arc;

use missive::{owner_tid, receive, receive_only, run, spawn, Error, FiberScheduler, Pattern};

const ROUNDS: i32 = 5;

fn rally() -> Result<(), Error> {
    let ponger = spawn(|| {
        let owner = owner_tid()?;
        for _ in 0..ROUNDS {
            let reply_to = owner.clone();
            receive(Pattern::new().on(move |n: i32| {
                reply_to.send(n + 1).expect("pong");
            }))?;
        }
        Ok(())
    });

    for n in 0..ROUNDS {
        ponger.send(n)?;
        let echoed = receive_only::<i32>()?;
        println!("  ping {n} -> pong {echoed}");
    }
    Ok(())
}

fn main() -> Result<(), Error> {
    env_logger::init();

    println!("kernel threads:");
    rally()?;

    println!("cooperative fibers:");
    run(Arc::new(FiberScheduler::new()), rally)?;

    Ok(())
}
