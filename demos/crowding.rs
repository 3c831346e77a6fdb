//! Bounded mailboxes under the three overflow policies.

use std::time::Duration;

use missive::{
    owner_tid, receive_only, receive_timeout, set_max_mailbox_size, spawn, Error, OnCrowding,
    Pattern,
};

fn main() -> Result<(), Error> {
    env_logger::init();

    // Block: all five messages arrive, producers just wait for room.
    let child = spawn(|| {
        let owner = owner_tid()?;
        for _ in 0..5 {
            let n = receive_only::<i32>()?;
            owner.send(n)?;
        }
        Ok(())
    });
    set_max_mailbox_size(&child, 2, OnCrowding::Block);
    for n in 0..5 {
        child.send(n)?;
    }
    let delivered: Vec<i32> = (0..5).map(|_| receive_only::<i32>().expect("echo")).collect();
    println!("Block delivered {delivered:?}");

    // Fail: the overflowing send reports a full mailbox.
    let slow = spawn(|| {
        // Never receives; its mailbox fills up.
        let outcome = receive_timeout(Duration::from_millis(300), Pattern::new().on(|_: ()| {}));
        outcome.map(|_| ())
    });
    set_max_mailbox_size(&slow, 1, OnCrowding::Fail);
    slow.send(1i32)?;
    match slow.send(2i32) {
        Err(Error::MailboxFull(tid)) => println!("Fail rejected the overflow for {tid:?}"),
        other => println!("unexpected outcome: {other:?}"),
    }

    // Drop: the overflow vanishes silently.
    let lossy = spawn(|| {
        let owner = owner_tid()?;
        std::thread::sleep(Duration::from_millis(100));
        let mut kept = Vec::new();
        while receive_timeout(Duration::ZERO, Pattern::new().on(|n: i32| kept.push(n)))? {}
        owner.send(kept)?;
        Ok(())
    });
    set_max_mailbox_size(&lossy, 1, OnCrowding::Drop);
    lossy.send(1i32)?;
    lossy.send(2i32)?;
    let kept = receive_only::<Vec<i32>>()?;
    println!("Drop kept {kept:?}");

    Ok(())
}
