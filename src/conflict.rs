//! Last-writer-wins conflict resolution.

/// Conflict resolution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local resource content and force a re-push.
    KeepLocal,
    /// Overwrite the local document with the relay's content.
    AcceptRemote,
}

pub struct ConflictResolver;

impl ConflictResolver {
    /// Resolve a version conflict by comparing edit stamps (epoch millis).
    ///
    /// The local resource wins only when its edit is strictly newer. An
    /// exact tie goes to the remote record: ties are rare, and converging
    /// toward the relay avoids oscillating re-pushes between devices with
    /// skewed clocks.
    pub fn resolve(local_last_edited: i64, remote_last_edited: i64) -> Resolution {
        if local_last_edited > remote_last_edited {
            Resolution::KeepLocal
        } else {
            Resolution::AcceptRemote
        }
    }
}
