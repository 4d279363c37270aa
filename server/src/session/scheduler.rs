//! Picks the next video whenever nothing is playing.
//!
//! Singers are queried one at a time in fairness order. The first non-empty
//! answer wins and its singer moves to the back of the rotation. Runs are
//! serialized on the session's scheduling lock, and the "nothing playing"
//! guard is re-checked at entry and after every reply.

use std::sync::Arc;

use super::Session;

/// Try to fill the empty "now playing" slot. Returns the selected video id.
pub async fn try_play_next(session: &Session) -> Option<String> {
    let _walk = session.scheduling.lock().await;

    if !session.current_video_id().is_empty() {
        tracing::trace!("Video already playing, scheduler idle");
        return None;
    }

    let singers = session.singer_queue();
    tracing::debug!(singers = singers.len(), "Looking for the next video");

    for singer in singers {
        let next = singer.next_video().await;

        if !session.current_video_id().is_empty() {
            tracing::debug!("Current video was set while scheduling, stopping");
            return None;
        }

        let Some(video_id) = next else {
            continue;
        };

        if !session.claim_current_video(&video_id) {
            tracing::debug!("Current video was set while scheduling, stopping");
            return None;
        }
        singer.mark_up(session.tick());

        tracing::info!(
            connection_id = %singer.id(),
            name = %singer.name(),
            video_id = %video_id,
            "Selected next video"
        );

        session.screens().broadcast("playVideo", &video_id);
        session.singers().broadcast("playingVideo", &video_id);
        session.broadcast_queue();

        return Some(video_id);
    }

    tracing::debug!("No singer has a queued video");
    None
}

/// Run [`try_play_next`] on its own task.
///
/// Triggers fire from connection reader loops. The walk waits on replies that
/// those same loops deliver, so it must never run inline.
pub fn spawn_try_play_next(session: Arc<Session>) {
    tokio::spawn(async move {
        try_play_next(&session).await;
    });
}
