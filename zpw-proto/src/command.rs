//! Classification of incoming frames by `(version, command, sub_command)`.

use crate::frame::FrameHeader;

/// What a push frame carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// `1/1/1`: in-band key handshake.
    Handshake,
    /// `2`: keepalive echo.
    Keepalive,
    /// `501/0`: batch of direct messages.
    DirectMessages,
    /// `521/0`: batch of group messages.
    GroupMessages,
    /// `601/0`: group control events.
    GroupControl,
    /// `612/*`: reactions, both single and grouped.
    Reactions,
    /// `3000/0`: the session was opened elsewhere.
    Takeover,
    /// `502`, `522`: delivery receipts.
    Delivered,
    /// `504`, `524`: seen / clear-unread markers.
    Seen,
    /// `602`: typing indicator.
    Typing,
    /// Anything else.
    Other,
}

impl Command {
    /// Classify a frame header.
    pub fn classify(h: FrameHeader) -> Self {
        match (h.version, h.command, h.sub_command) {
            (1, 1, 1)   => Self::Handshake,
            (_, 2, _)   => Self::Keepalive,
            (1, 501, 0) => Self::DirectMessages,
            (1, 521, 0) => Self::GroupMessages,
            (1, 601, 0) => Self::GroupControl,
            (_, 612, _) => Self::Reactions,
            (1, 3000, 0) => Self::Takeover,
            (_, 502 | 522, _) => Self::Delivered,
            (_, 504 | 524, _) => Self::Seen,
            (_, 602, _) => Self::Typing,
            _ => Self::Other,
        }
    }

    /// Whether the frame carries an encrypted data envelope worth decoding.
    pub fn carries_payload(self) -> bool {
        matches!(
            self,
            Self::DirectMessages | Self::GroupMessages | Self::GroupControl | Self::Reactions
        )
    }
}
