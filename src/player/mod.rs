// Playback control loop - the state machine at the center of the player.
//
// The outer loop picks the next track (explicit queue first, weighted draw
// otherwise); the per-track loop polls one key at a time in raw mode,
// mutates session state, repaints the status block every tick and dispatches
// presence/share traffic onto background tasks. The foreground loop never
// blocks on network I/O.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::audio::AudioEngine;
use crate::config::PlaybackConfig;
use crate::library::{self, Track};
use crate::presence::{unix_now_secs, PresenceBridge, UpdateRequest};
use crate::share::ShareBridge;
use crate::term::{self, Interrupted, Key};
use crate::weights;

const NORMAL_CONTROLS: &str =
    "controls: [s]kip, [r]eload presence, [p]ause, volume [u]p, volume [d]own, [q]ueue mode";
const QUEUE_CONTROLS: &str = "enter to submit, tab to autocomplete, esc to leave";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    /// Modal overlay for typing a queue entry; leaves playback state alone
    /// and returns to whatever it was entered from.
    QueueInput,
}

enum Flow {
    Continue,
    Skip,
}

/// One track currently playing or paused.
struct TrackSession {
    track: Track,
    playing: bool,
    mode: Mode,
    /// Queue-entry text buffer, only meaningful in queue-input mode.
    entry: String,
    /// Prefix the autocomplete cycles within; reset whenever the buffer is
    /// edited by hand.
    auto_anchor: String,
    /// Lines of the previous frame, so the redraw can erase exactly the
    /// rows it occupies at the current terminal width.
    lines_written: Option<Vec<String>>,
}

impl TrackSession {
    fn new(track: Track) -> Self {
        Self {
            track,
            playing: true,
            mode: Mode::Normal,
            entry: String::new(),
            auto_anchor: String::new(),
            lines_written: None,
        }
    }
}

pub struct Player {
    engine: Box<dyn AudioEngine>,
    presence: Arc<PresenceBridge>,
    share: Option<Arc<ShareBridge>>,
    weights_file: Option<PathBuf>,
    playback: PlaybackConfig,
    queue: VecDeque<String>,
    volume: f32,
    rng: StdRng,
}

impl Player {
    pub fn new(
        engine: Box<dyn AudioEngine>,
        presence: Arc<PresenceBridge>,
        share: Option<Arc<ShareBridge>>,
        weights_file: Option<PathBuf>,
        initial: Option<String>,
        playback: PlaybackConfig,
    ) -> Self {
        let mut queue = VecDeque::new();
        if let Some(track) = initial {
            queue.push_back(track);
        }

        Self {
            engine,
            presence,
            share,
            weights_file,
            playback,
            queue,
            volume: 1.0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Selection loop: drain the explicit queue first, otherwise draw a
    /// track by weight. Runs until the user interrupts.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let file = match self.queue.pop_front() {
                Some(file) => file,
                None => {
                    let files = library::list_audio_files(".")?;
                    let (tracks, table) =
                        weights::build_weights(self.weights_file.as_deref(), files)?;
                    weights::choose(&tracks, table.as_deref(), &mut self.rng)?.to_string()
                }
            };

            self.play_track(&file).await?;
        }
    }

    /// Per-track session: loops until the track ends or is skipped, polling
    /// keys and repainting on a fixed short interval.
    async fn play_track(&mut self, file: &str) -> Result<()> {
        let track = Track::load(file);
        info!("now playing {} ({:.0}s)", track.name, track.duration_secs);

        self.engine.load(Path::new(file))?;
        self.engine.set_volume(self.volume);

        if let (Some(share), Some(id)) = (&self.share, &track.video_id) {
            share.push(id, 0.0, true);
        }

        let mut session = TrackSession::new(track);
        let mut tick: u64 = 0;

        loop {
            // Ended: engine reports not-busy while we think it is playing.
            if session.playing && !self.engine.is_busy() {
                break;
            }

            match term::read_key()? {
                Some(Key::Interrupt) => return Err(Interrupted.into()),
                Some(key) => {
                    if let Flow::Skip = self.handle_key(&mut session, key) {
                        println!();
                        return Ok(());
                    }
                }
                None => {}
            }

            // Coarse full resync keeps presence honest against engine drift
            // without flooding the socket; the redraw below runs every tick.
            if session.playing && tick % self.playback.presence_resync_ticks == 0 {
                self.presence.update(self.now_playing_request(&session));
            }

            self.redraw(&mut session)?;

            tick += 1;
            tokio::time::sleep(Duration::from_millis(self.playback.poll_interval_ms)).await;
        }

        println!();
        Ok(())
    }

    fn handle_key(&mut self, session: &mut TrackSession, key: Key) -> Flow {
        match session.mode {
            Mode::QueueInput => {
                self.handle_queue_key(session, key);
                Flow::Continue
            }
            Mode::Normal => self.handle_normal_key(session, key),
        }
    }

    fn handle_normal_key(&mut self, session: &mut TrackSession, key: Key) -> Flow {
        match key {
            Key::Char('s') => return Flow::Skip,
            Key::Char('r') => {
                // Reconnect in the background; the reload re-issues the most
                // recent update once the fresh handle is up.
                self.presence.reload();
            }
            Key::Char('p') => self.toggle_pause(session),
            Key::Char('u') => {
                self.volume = (self.volume + self.playback.volume_step).min(1.0);
                self.engine.set_volume(self.volume);
            }
            Key::Char('d') => {
                self.volume = (self.volume - self.playback.volume_step).max(0.0);
                self.engine.set_volume(self.volume);
            }
            Key::Char('q') => {
                session.mode = Mode::QueueInput;
                session.entry.clear();
                session.auto_anchor.clear();
            }
            _ => {}
        }
        Flow::Continue
    }

    fn toggle_pause(&mut self, session: &mut TrackSession) {
        let progress = self.engine.position_millis() as f64 / 1000.0;

        if session.playing {
            if let (Some(share), Some(id)) = (&self.share, &session.track.video_id) {
                share.push(id, progress, false);
            }
            self.engine.pause();
            session.playing = false;
            self.presence.update(UpdateRequest {
                name: format!("Paused: {}", session.track.name),
                start: Some(unix_now_secs()),
                end: None,
                details: None,
                duration_secs: session.track.duration_secs,
            });
        } else {
            self.engine.unpause();
            if let (Some(share), Some(id)) = (&self.share, &session.track.video_id) {
                share.push(id, progress, true);
            }
            session.playing = true;
            self.presence.update(self.now_playing_request(session));
        }
    }

    fn handle_queue_key(&mut self, session: &mut TrackSession, key: Key) {
        match key {
            Key::Esc => {
                session.entry.clear();
                session.auto_anchor.clear();
                session.mode = Mode::Normal;
            }
            Key::Backspace => {
                session.entry.pop();
                session.auto_anchor.clear();
            }
            Key::Tab => {
                if session.auto_anchor.is_empty() {
                    session.auto_anchor = session.entry.clone();
                }
                let files = library::list_audio_files(".").unwrap_or_default();
                if let Some(next) =
                    cycle_autocomplete(&session.entry, &session.auto_anchor, &files)
                {
                    session.entry = next;
                }
            }
            Key::Enter => {
                let files = library::list_audio_files(".").unwrap_or_default();
                match first_prefix_match(&session.entry, &files) {
                    Some(file) => self.queue.push_back(file),
                    None => warn!("queue: nothing matches {:?}", session.entry),
                }
                session.entry.clear();
                session.auto_anchor.clear();
                session.mode = Mode::Normal;
            }
            Key::Char(c) if !c.is_control() => {
                session.entry.push(c);
                session.auto_anchor.clear();
            }
            _ => {}
        }
    }

    /// Presence fields for the playing state, with start/end derived from
    /// the engine's reported position rather than wall-clock accumulation.
    fn now_playing_request(&self, session: &TrackSession) -> UpdateRequest {
        let position = self.engine.position_millis() as f64 / 1000.0;
        let now = unix_now_secs();

        UpdateRequest {
            name: session.track.name.clone(),
            start: Some(now - position as i64),
            end: Some(now + (session.track.duration_secs - position) as i64),
            details: None,
            duration_secs: session.track.duration_secs,
        }
    }

    fn render_frame(&self, session: &TrackSession) -> Vec<String> {
        let header = if session.playing {
            format!("Now playing {}", session.track.name)
        } else {
            format!("Paused: {}", session.track.name)
        };
        let controls = match session.mode {
            Mode::Normal => NORMAL_CONTROLS,
            Mode::QueueInput => QUEUE_CONTROLS,
        };

        vec![
            header,
            self.render_progress_bar(session),
            controls.to_string(),
            format!("volume: {:.2}", self.volume),
            session.entry.clone(),
        ]
    }

    fn render_progress_bar(&self, session: &TrackSession) -> String {
        let elapsed = self.engine.position_millis() as f64 / 1000.0;
        let total = session.track.duration_secs;
        let remaining = (total - elapsed).max(0.0);

        let left_timer = format!("{}:{:02} ", elapsed as u64 / 60, elapsed as u64 % 60);
        let right_timer = format!(" -{}:{:02}", remaining as u64 / 60, remaining as u64 % 60);

        let columns = term::terminal_columns();
        let bar_width = columns.saturating_sub(left_timer.len() + right_timer.len());
        let ratio = if total > 0.0 {
            (elapsed / total).min(1.0)
        } else {
            0.0
        };
        let filled = (ratio * bar_width as f64) as usize;

        format!(
            "{left_timer}\x1b[32m{}\x1b[0m{}{right_timer}",
            "━".repeat(filled),
            "━".repeat(bar_width - filled)
        )
    }

    /// Erase exactly the rows the previous frame occupied, then repaint.
    /// Raw mode means no newline translation, so lines join with `\r\n`.
    fn redraw(&self, session: &mut TrackSession) -> Result<()> {
        let columns = term::terminal_columns();
        let erase_rows = session
            .lines_written
            .as_ref()
            .map(|lines| term::rows_occupied(lines, columns))
            .unwrap_or(3);

        let frame = self.render_frame(session);

        let mut out = String::new();
        out.push_str(term::CLEAR_LINE);
        out.push('\r');
        for _ in 1..erase_rows {
            out.push_str(term::MOVE_AND_CLEAR_LINE);
        }
        out.push_str(&frame.join("\r\n"));
        out.push('\r');

        let mut stdout = io::stdout();
        stdout.write_all(out.as_bytes())?;
        stdout.flush()?;

        session.lines_written = Some(frame);
        Ok(())
    }
}

/// Cycle to the lexicographically-next file matching `anchor` as a prefix,
/// wrapping past the end. An empty anchor jumps to the first match overall.
/// `files` must be sorted.
fn cycle_autocomplete(entry: &str, anchor: &str, files: &[String]) -> Option<String> {
    let matches: Vec<&String> = files.iter().filter(|f| f.starts_with(anchor)).collect();
    if matches.is_empty() {
        return None;
    }

    if anchor.is_empty() {
        return Some(matches[0].clone());
    }

    let idx = matches.partition_point(|f| f.as_str() <= entry) % matches.len();
    Some(matches[idx].clone())
}

fn first_prefix_match(entry: &str, files: &[String]) -> Option<String> {
    files.iter().find(|f| f.starts_with(entry)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{PresenceClient, PresenceOpener};
    use anyhow::anyhow;

    struct FakeEngine {
        busy: bool,
        position: u64,
    }

    impl FakeEngine {
        fn new() -> Self {
            Self {
                busy: true,
                position: 5_000,
            }
        }
    }

    impl AudioEngine for FakeEngine {
        fn load(&mut self, _path: &Path) -> Result<()> {
            self.busy = true;
            Ok(())
        }

        fn pause(&mut self) {}

        fn unpause(&mut self) {}

        fn is_busy(&self) -> bool {
            self.busy
        }

        fn position_millis(&self) -> u64 {
            self.position
        }

        fn set_volume(&mut self, _volume: f32) {}
    }

    struct SilentClient;

    impl PresenceClient for SilentClient {
        fn set_activity(&mut self, _fields: &crate::presence::ActivityFields) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
    }

    fn test_player() -> Player {
        let opener: PresenceOpener =
            Box::new(|| Ok(Box::new(SilentClient) as Box<dyn PresenceClient>));
        let presence = PresenceBridge::new(
            opener,
            None,
            true,
            crate::config::Config::default().presence,
        )
        .unwrap();

        Player::new(
            Box::new(FakeEngine::new()),
            presence,
            None,
            None,
            None,
            crate::config::Config::default().playback,
        )
    }

    fn test_session() -> TrackSession {
        TrackSession::new(Track {
            file: "song [dQw4w9WgXcQ].mp3".to_string(),
            name: "song [dQw4w9WgXcQ]".to_string(),
            duration_secs: 180.0,
            video_id: Some("dQw4w9WgXcQ".to_string()),
        })
    }

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_volume_increase_never_exceeds_one() {
        let mut player = test_player();
        player.volume = 0.99;
        let mut session = test_session();

        for _ in 0..10 {
            player.handle_key(&mut session, Key::Char('u'));
        }
        assert!(player.volume <= 1.0);
    }

    #[test]
    fn test_volume_decrease_never_drops_below_zero() {
        let mut player = test_player();
        player.volume = 0.02;
        let mut session = test_session();

        for _ in 0..10 {
            player.handle_key(&mut session, Key::Char('d'));
        }
        assert!(player.volume >= 0.0);
    }

    #[test]
    fn test_skip_exits_the_track_loop() {
        let mut player = test_player();
        let mut session = test_session();

        assert!(matches!(
            player.handle_key(&mut session, Key::Char('s')),
            Flow::Skip
        ));
    }

    #[test]
    fn test_pause_twice_returns_to_playing_with_elapsed_preserved() {
        // Runtime context for the spawn_blocking calls inside presence
        // updates; entered from a plain thread so the blocking HTTP client
        // in PresenceBridge::new can be constructed.
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let mut player = test_player();
        let mut session = test_session();
        let before = player.engine.position_millis();

        player.handle_key(&mut session, Key::Char('p'));
        assert!(!session.playing);

        player.handle_key(&mut session, Key::Char('p'));
        assert!(session.playing);

        // Elapsed time comes from the engine position, which a pause/resume
        // pair does not advance.
        assert_eq!(player.engine.position_millis(), before);
    }

    #[test]
    fn test_queue_mode_returns_to_the_state_it_was_entered_from() {
        let mut player = test_player();
        let mut session = test_session();
        session.playing = false;

        player.handle_key(&mut session, Key::Char('q'));
        assert_eq!(session.mode, Mode::QueueInput);
        assert!(!session.playing);

        player.handle_key(&mut session, Key::Esc);
        assert_eq!(session.mode, Mode::Normal);
        assert!(!session.playing);
    }

    #[test]
    fn test_queue_input_edits_buffer() {
        let mut player = test_player();
        let mut session = test_session();
        session.mode = Mode::QueueInput;

        player.handle_key(&mut session, Key::Char('s'));
        player.handle_key(&mut session, Key::Char('o'));
        assert_eq!(session.entry, "so");

        player.handle_key(&mut session, Key::Backspace);
        assert_eq!(session.entry, "s");
    }

    #[test]
    fn test_autocomplete_cycles_within_prefix_matches_and_wraps() {
        let listing = files(&["other.mp3", "song_a.mp3", "song_b.mp3"]);

        let first = cycle_autocomplete("so", "so", &listing).unwrap();
        assert_eq!(first, "song_a.mp3");

        let second = cycle_autocomplete(&first, "so", &listing).unwrap();
        assert_eq!(second, "song_b.mp3");

        // Wraps back to the first match after the last.
        let third = cycle_autocomplete(&second, "so", &listing).unwrap();
        assert_eq!(third, "song_a.mp3");
    }

    #[test]
    fn test_autocomplete_empty_buffer_jumps_to_first_match() {
        let listing = files(&["a.mp3", "b.mp3"]);
        assert_eq!(cycle_autocomplete("", "", &listing).unwrap(), "a.mp3");
        // And stays there; the empty anchor never cycles.
        assert_eq!(cycle_autocomplete("a.mp3", "", &listing).unwrap(), "a.mp3");
    }

    #[test]
    fn test_autocomplete_no_matches_leaves_buffer_alone() {
        let listing = files(&["song.mp3"]);
        assert!(cycle_autocomplete("zz", "zz", &listing).is_none());
    }

    #[test]
    fn test_first_prefix_match_picks_sorted_first() {
        let listing = files(&["song_a.mp3", "song_b.mp3"]);
        assert_eq!(
            first_prefix_match("song", &listing),
            Some("song_a.mp3".to_string())
        );
        assert_eq!(first_prefix_match("zz", &listing), None);
    }

    #[test]
    fn test_presence_failure_does_not_disturb_the_state_machine() {
        // Runtime context for the spawn_blocking calls inside presence
        // updates; entered from a plain thread so the blocking HTTP client
        // in PresenceBridge::new can be constructed.
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();

        // A client that always raises: the bridge goes inert, the player
        // keeps toggling state as if nothing happened.
        struct FailingClient;
        impl PresenceClient for FailingClient {
            fn set_activity(
                &mut self,
                _fields: &crate::presence::ActivityFields,
            ) -> Result<()> {
                Err(anyhow!("pipe closed"))
            }
            fn close(&mut self) {}
        }

        let opener: PresenceOpener =
            Box::new(|| Ok(Box::new(FailingClient) as Box<dyn PresenceClient>));
        let presence = PresenceBridge::new(
            opener,
            None,
            true,
            crate::config::Config::default().presence,
        )
        .unwrap();
        presence.connect_initial();

        let mut player = Player::new(
            Box::new(FakeEngine::new()),
            presence,
            None,
            None,
            None,
            crate::config::Config::default().playback,
        );
        let mut session = test_session();

        player.handle_key(&mut session, Key::Char('p'));
        assert!(!session.playing);
        player.handle_key(&mut session, Key::Char('p'));
        assert!(session.playing);
    }
}
