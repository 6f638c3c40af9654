//! Story playback
//!
//! A user-paced walkthrough of the mail pipeline. The script is fixed
//! reference data and the cursor moves only on explicit user actions; the
//! live event stream neither drives nor is throttled by it.

use serde::Serialize;
use std::time::Duration;

/// One narration step of the walkthrough
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoryStep {
    pub title: &'static str,
    pub subtitle: &'static str,
    pub description: &'static str,
    pub explanation: &'static str,
    /// Node this step focuses on
    pub node_id: &'static str,
    /// Nominal animation length
    #[serde(skip)]
    pub animation: Duration,
}

const STEP_ANIMATION: Duration = Duration::from_secs(2);

/// The walkthrough script
pub static STORY: [StoryStep; 8] = [
    StoryStep {
        title: "Email Reception",
        subtitle: "SMTP Server",
        description: "SMTP server receives incoming emails and initiates the processing pipeline.",
        explanation: "The SMTP server acts as the primary entry point for incoming emails. It validates sender credentials, checks email format compliance, performs initial spam filtering based on sender reputation, and establishes secure connections with sending servers.",
        node_id: "smtp",
        animation: STEP_ANIMATION,
    },
    StoryStep {
        title: "Email Retrieval",
        subtitle: "IMAP Protocol",
        description: "IMAP allows clients to access and synchronize emails stored on the server.",
        explanation: "IMAP enables multiple devices to access the same mailbox simultaneously. It supports server-side email management, folder synchronization, partial message downloading, and maintains email state across different clients.",
        node_id: "imap",
        animation: STEP_ANIMATION,
    },
    StoryStep {
        title: "Email Download",
        subtitle: "POP3 Protocol",
        description: "POP3 downloads emails from server to client for offline access and local storage.",
        explanation: "POP3 provides a simple mechanism for downloading emails to local devices. It suits single-device access and reduces server storage requirements by transferring emails to the client.",
        node_id: "pop3",
        animation: STEP_ANIMATION,
    },
    StoryStep {
        title: "Secure Transmission",
        subtitle: "TLS Encryption",
        description: "TLS encryption secures all email communications during transmission.",
        explanation: "TLS creates encrypted tunnels for SMTP, IMAP and POP3. It negotiates the strongest available cipher, performs the handshake, and protects against eavesdropping and tampering.",
        node_id: "tls",
        animation: STEP_ANIMATION,
    },
    StoryStep {
        title: "Network Transport",
        subtitle: "TCP/IP Protocol",
        description: "TCP/IP ensures reliable delivery of email data across complex network infrastructures.",
        explanation: "TCP/IP handles packet routing, error detection, retransmission of lost data, flow control, and congestion management so that messages arrive complete and in order.",
        node_id: "tcp",
        animation: STEP_ANIMATION,
    },
    StoryStep {
        title: "Threat Analysis",
        subtitle: "AI Engine",
        description: "Advanced AI analyzes emails for security threats and content classification.",
        explanation: "The AI engine looks for spam, phishing attempts, malware, and suspicious patterns in text content, link destinations, attachment types, and sender behaviour.",
        node_id: "ai",
        animation: STEP_ANIMATION,
    },
    StoryStep {
        title: "Content Protection",
        subtitle: "Encryption Process",
        description: "Email content is encrypted before storage.",
        explanation: "Each message is encrypted with its own key. Keys are rotated and managed separately so stored data stays protected even if database access is compromised.",
        node_id: "crypto",
        animation: STEP_ANIMATION,
    },
    StoryStep {
        title: "Secure Storage",
        subtitle: "Database",
        description: "Encrypted emails are stored in a secure, redundant database system.",
        explanation: "The database layers access controls, audit logging, encryption at rest, automated backups, and disaster recovery on top of the encrypted messages.",
        node_id: "database",
        animation: STEP_ANIMATION,
    },
];

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Not started, cursor at 0
    Idle,
    /// Started and running
    Playing,
    /// Started but paused
    Paused,
    /// Walked past the last step; cursor stays on it
    Finished,
}

/// Cursor over [`STORY`]
#[derive(Debug, Clone)]
pub struct Playback {
    state: PlaybackState,
    cursor: usize,
    explanation_visible: bool,
}

impl Playback {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Idle,
            cursor: 0,
            explanation_visible: true,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn last_index(&self) -> usize {
        STORY.len() - 1
    }

    pub fn is_last_step(&self) -> bool {
        self.cursor == self.last_index()
    }

    /// Playback has been started and not finished or reset
    pub fn is_started(&self) -> bool {
        matches!(self.state, PlaybackState::Playing | PlaybackState::Paused)
    }

    /// Paused flag; true whenever playback is not actively running
    pub fn is_paused(&self) -> bool {
        !matches!(self.state, PlaybackState::Playing)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, PlaybackState::Playing)
    }

    pub fn explanation_visible(&self) -> bool {
        self.explanation_visible
    }

    pub fn current_step(&self) -> &'static StoryStep {
        &STORY[self.cursor]
    }

    /// 1-based position and script length
    pub fn progress(&self) -> (usize, usize) {
        (self.cursor + 1, STORY.len())
    }

    /// Begin (or restart) the walkthrough. No-op while already playing.
    pub fn start(&mut self) -> bool {
        if self.is_playing() {
            return false;
        }
        self.state = PlaybackState::Playing;
        self.cursor = 0;
        self.explanation_visible = true;
        true
    }

    pub fn pause(&mut self) -> bool {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
            true
        } else {
            false
        }
    }

    pub fn resume(&mut self) -> bool {
        if self.state == PlaybackState::Paused {
            self.state = PlaybackState::Playing;
            true
        } else {
            false
        }
    }

    pub fn toggle_pause(&mut self) -> bool {
        match self.state {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused => self.resume(),
            _ => false,
        }
    }

    /// Advance one step, or finish when already on the last step
    pub fn next(&mut self) {
        if self.cursor < self.last_index() {
            self.cursor += 1;
            self.explanation_visible = true;
        } else {
            self.state = PlaybackState::Finished;
        }
    }

    /// Go back one step; no-op on the first step
    pub fn previous(&mut self) -> bool {
        if self.cursor > 0 {
            self.cursor -= 1;
            self.explanation_visible = true;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.state = PlaybackState::Idle;
        self.cursor = 0;
        self.explanation_visible = true;
    }

    pub fn hide_explanation(&mut self) {
        self.explanation_visible = false;
    }
}

impl Default for Playback {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ProtocolGraph;

    #[test]
    fn test_script_targets_known_nodes() {
        let graph = ProtocolGraph::new();
        assert_eq!(STORY.len(), 8);
        for step in STORY.iter() {
            assert!(graph.node(step.node_id).is_some(), "{}", step.node_id);
        }
    }

    #[test]
    fn test_new_playback_is_idle() {
        let playback = Playback::new();
        assert_eq!(playback.state(), PlaybackState::Idle);
        assert_eq!(playback.cursor(), 0);
        assert!(!playback.is_started());
        assert!(playback.is_paused());
        assert!(playback.explanation_visible());
    }

    #[test]
    fn test_seven_nexts_reach_last_step_and_eighth_finishes() {
        let mut playback = Playback::new();
        for _ in 0..7 {
            playback.next();
        }
        assert_eq!(playback.cursor(), 7);
        assert!(playback.is_last_step());
        assert_eq!(playback.current_step().node_id, "database");

        playback.next();
        assert_eq!(playback.state(), PlaybackState::Finished);
        assert_eq!(playback.cursor(), 7);
        assert!(!playback.is_started());
        assert!(playback.is_paused());
    }

    #[test]
    fn test_finish_from_playing() {
        let mut playback = Playback::new();
        playback.start();
        for _ in 0..8 {
            playback.next();
        }
        assert_eq!(playback.state(), PlaybackState::Finished);

        assert!(playback.start());
        assert_eq!(playback.state(), PlaybackState::Playing);
        assert_eq!(playback.cursor(), 0);
    }

    #[test]
    fn test_previous_at_zero_is_noop() {
        let mut playback = Playback::new();
        assert!(!playback.previous());
        assert_eq!(playback.cursor(), 0);

        playback.next();
        playback.hide_explanation();
        assert!(playback.previous());
        assert_eq!(playback.cursor(), 0);
        assert!(playback.explanation_visible());
    }

    #[test]
    fn test_pause_and_resume_keep_cursor() {
        let mut playback = Playback::new();
        assert!(!playback.pause());

        playback.start();
        playback.next();
        assert!(playback.toggle_pause());
        assert_eq!(playback.state(), PlaybackState::Paused);
        assert_eq!(playback.cursor(), 1);

        assert!(playback.resume());
        assert!(playback.is_playing());
        assert_eq!(playback.cursor(), 1);
    }

    #[test]
    fn test_start_is_noop_while_playing() {
        let mut playback = Playback::new();
        playback.start();
        playback.next();
        assert!(!playback.start());
        assert_eq!(playback.cursor(), 1);
    }

    #[test]
    fn test_reset_from_every_state() {
        let setups: [fn(&mut Playback); 4] = [
            |_| {},
            |p| {
                p.start();
                p.next();
            },
            |p| {
                p.start();
                p.next();
                p.pause();
            },
            |p| {
                for _ in 0..9 {
                    p.next();
                }
            },
        ];

        for setup in setups {
            let mut playback = Playback::new();
            setup(&mut playback);
            playback.hide_explanation();
            playback.reset();
            assert_eq!(playback.state(), PlaybackState::Idle);
            assert_eq!(playback.cursor(), 0);
            assert!(playback.explanation_visible());
        }
    }
}
