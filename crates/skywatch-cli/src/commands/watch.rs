//! `skywatch watch` - a console host for one sync session.
//!
//! Stdin lines act as the filter UI; change events are logged (or printed
//! as JSON lines) as the presentation sink.

use std::io::BufRead;
use std::thread;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{info, warn};

use skywatch_core::{Filter, SessionSettings};
use skywatch_sync::{Session, SessionHandle};
use skywatch_tree::{ConnectionState, Node, Region, SyncEvent};

pub async fn watch(settings: SessionSettings, json: bool) -> anyhow::Result<()> {
    let (session, handle) = Session::new(settings);
    let sink = tokio::spawn(present(handle.subscribe(), json));
    let session = tokio::spawn(session.run());

    let mut lines = stdin_lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.recv(), if stdin_open => match line {
                Some(line) => {
                    if !dispatch(&handle, line.trim())? {
                        break;
                    }
                }
                None => stdin_open = false,
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("shutdown signal received");
                break;
            }
        }
    }

    handle.shutdown()?;
    let engine = session.await?;
    if !json {
        print_tree(&engine.tree().snapshot());
    }

    // The sink finishes once every bus owner is gone.
    drop(engine);
    drop(handle);
    sink.await?;
    Ok(())
}

/// Read stdin on a plain thread. A blocking read cannot be cancelled, so
/// the thread is left behind when the process exits.
fn stdin_lines() -> UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Handle one line of user input. Returns `false` to quit.
fn dispatch(handle: &SessionHandle, input: &str) -> anyhow::Result<bool> {
    match input {
        "" => {}
        "quit" | "exit" => return Ok(false),
        "reconnect" => handle.reconnect()?,
        other => match other.parse::<Filter>() {
            Ok(filter) => handle.select_filter(filter)?,
            Err(e) => warn!(error = %e, "expected all, registered, unregistered, reconnect or quit"),
        },
    }
    Ok(true)
}

async fn present(mut events: UnboundedReceiver<SyncEvent>, json: bool) {
    while let Some(event) = events.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, event = event.name(), "event not serializable"),
            }
            continue;
        }

        match &event {
            SyncEvent::InstanceAdded(i) | SyncEvent::InstanceUpdated(i) => info!(
                event = event.name(),
                region = %i.region,
                node = %i.node,
                instance = %i.id,
                service = %i.service,
                version = %i.version,
                registered = i.registered,
                "instance"
            ),
            SyncEvent::InstanceRemoved {
                instance_id,
                node_id,
                region_id,
            } => info!(event = event.name(), region = %region_id, node = %node_id, instance = %instance_id, "instance"),
            SyncEvent::RegionAdded(Region { id: region_id, .. })
            | SyncEvent::RegionRemoved { region_id } => {
                info!(event = event.name(), region = %region_id, "region")
            }
            SyncEvent::NodeAdded(Node {
                id: node_id,
                region: region_id,
                ..
            })
            | SyncEvent::NodeRemoved { node_id, region_id } => {
                info!(event = event.name(), region = %region_id, node = %node_id, "node")
            }
            SyncEvent::TreeRebuilt(regions) => info!(
                event = event.name(),
                regions = regions.len(),
                instances = regions.iter().map(Region::instance_count).sum::<usize>(),
                "tree"
            ),
            SyncEvent::TreeCleared => info!(event = event.name(), "tree"),
            SyncEvent::ConnectionStateChanged(ConnectionState::GivenUp) => {
                warn!("registry unavailable, type `reconnect` to try again")
            }
            SyncEvent::ConnectionStateChanged(state) => info!(event = event.name(), %state, "connection"),
        }
    }
}

fn print_tree(regions: &[Region]) {
    for region in regions {
        println!("{}", region.name());
        for node in &region.nodes {
            println!("  {}", node.name());
            for i in &node.instances {
                let status = if i.registered { "registered" } else { "unregistered" };
                println!("    {:<21} {} {} ({status})", i.id, i.service, i.version);
            }
        }
    }
}
