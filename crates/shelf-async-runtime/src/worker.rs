use crate::shell::{OpenRequest, ViewerShell};
use crate::{ReaderCommand, ReaderUpdate};
use shelf_reader::{EngineLoader, LibraryApi, NavTarget, ReaderConfig};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Async worker task that runs one reading session and sends updates
///
/// Ends after `Close`, or when the host drops its command sender. Open
/// failures are reported as `ReaderUpdate::Error` before the task returns.
pub async fn reader_task(
    loader: Arc<EngineLoader>,
    api: Arc<dyn LibraryApi>,
    config: ReaderConfig,
    request: OpenRequest,
    mut command_rx: mpsc::UnboundedReceiver<ReaderCommand>,
    update_tx: mpsc::UnboundedSender<ReaderUpdate>,
) {
    let Ok(mut shell) = ViewerShell::open(&loader, api, request, &config, update_tx).await else {
        return;
    };
    let mut densify_rx = shell.take_densify_requests();
    let mut backlog = VecDeque::new();

    loop {
        let cmd = match backlog.pop_front() {
            Some(cmd) => cmd,
            None => {
                tokio::select! {
                    cmd = command_rx.recv() => match cmd {
                        Some(cmd) => cmd,
                        None => break,
                    },
                    Some(units) = next_densify(&mut densify_rx) => {
                        log::info!("Book {}: densifying location index to {} per item", shell.book_id(), units);
                        shell.reindex(units);
                        continue;
                    }
                }
            }
        };

        if !process_command(cmd, &shell, &mut command_rx, &mut backlog) {
            break;
        }
    }

    shell.close();
}

async fn next_densify(rx: &mut Option<mpsc::UnboundedReceiver<usize>>) -> Option<usize> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Returns false once the session should end
fn process_command(
    cmd: ReaderCommand,
    shell: &ViewerShell,
    command_rx: &mut mpsc::UnboundedReceiver<ReaderCommand>,
    backlog: &mut VecDeque<ReaderCommand>,
) -> bool {
    match cmd {
        ReaderCommand::Next => {
            shell.next();
        }
        ReaderCommand::Prev => {
            shell.prev();
        }
        ReaderCommand::GoTo { target } => {
            // Deduplicate jumps - keep the most recent one
            let target = latest_go_to(target, command_rx, backlog);
            shell.go_to(target);
        }
        ReaderCommand::JumpToChapter { index } => {
            if let Err(e) = shell.jump_to_chapter(index) {
                log::warn!("Book {}: {}", shell.book_id(), e);
            }
        }
        ReaderCommand::Close => return false,
    }
    true
}

fn latest_go_to(
    mut target: NavTarget,
    command_rx: &mut mpsc::UnboundedReceiver<ReaderCommand>,
    backlog: &mut VecDeque<ReaderCommand>,
) -> NavTarget {
    while let Ok(next_cmd) = command_rx.try_recv() {
        if let ReaderCommand::GoTo { target: newer } = next_cmd {
            log::debug!("Discarding queued jump to {:?}, using newer request", target);
            target = newer;
        } else {
            // Anything else runs after the jump, in order
            backlog.push_back(next_cmd);
            break;
        }
    }
    target
}
