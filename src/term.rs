use std::error::Error;
use std::io::{self, Stdout, Write};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::{cursor, execute, queue, style, terminal};
use jidi::timing::{PlaybackStatus, micros_to_bpm};
use jidi::{Session, VoiceSink};

const FRAME: Duration = Duration::from_millis(16);
const SEEK_BEATS: i64 = 4;

/// Restores the terminal however the loop exits.
struct RawMode {
    out: Stdout,
}

impl RawMode {
    fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut out = io::stdout();
        execute!(out, cursor::Hide)?;
        Ok(Self { out })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = execute!(self.out, cursor::Show, style::Print("\r\n"));
        let _ = terminal::disable_raw_mode();
    }
}

enum Action {
    Continue,
    Exit,
}

pub fn run_player<S: VoiceSink>(session: &mut Session<S>) -> Result<(), Box<dyn Error>> {
    let mut raw = RawMode::enter()?;
    let clock = Instant::now();
    let now = || clock.elapsed().as_micros() as u64;

    session.play(now())?;
    let mut last_frame = Instant::now();

    loop {
        if event::poll(FRAME)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Action::Exit = handle_key(session, key, now())? {
                        break;
                    }
                }
            }
        }

        let frame_seconds = last_frame.elapsed().as_secs_f64();
        last_frame = Instant::now();

        let t = now();
        let (tick, micros_per_beat, visible) = {
            let (_, frame) = session.poll(t, frame_seconds)?;
            (frame.current_tick, frame.micros_per_beat, frame.visible_notes)
        };

        let status = match session.status() {
            PlaybackStatus::Playing => "",
            PlaybackStatus::Paused => "PAUSED",
            PlaybackStatus::Finished => "FINISHED",
            PlaybackStatus::Stopped => "STOPPED",
        };
        let line = format!(
            "{:>7.1}s  tick {:>9}  {:>5.0} BPM  {:>6} notes  quality {}  speed x{:.2}  {}",
            session.scheduler().elapsed(t) / 1_000_000.0,
            tick,
            micros_to_bpm(micros_per_beat),
            visible,
            session.view().quality().label(),
            session.view().scroll_speed(),
            status,
        );
        draw_status(&mut raw.out, &line)?;
    }

    session.close();
    Ok(())
}

fn handle_key<S: VoiceSink>(
    session: &mut Session<S>,
    key: KeyEvent,
    now: u64,
) -> Result<Action, Box<dyn Error>> {
    match key.code {
        KeyCode::Esc => return Ok(Action::Exit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            return Ok(Action::Exit);
        }
        KeyCode::Char(' ') => session.toggle_pause(now),
        KeyCode::Char('r') | KeyCode::Char('R') => session.restart(now)?,
        KeyCode::Char('f') | KeyCode::Char('F') => session.skip_to_first_note(now)?,
        KeyCode::Char('q') | KeyCode::Char('Q') => session.view_mut().cycle_quality(),
        KeyCode::Up => session.view_mut().adjust_scroll_speed(1),
        KeyCode::Down => session.view_mut().adjust_scroll_speed(-1),
        KeyCode::Left => session.seek_beats(-SEEK_BEATS, now)?,
        KeyCode::Right => session.seek_beats(SEEK_BEATS, now)?,
        _ => {}
    }
    Ok(Action::Continue)
}

fn draw_status(out: &mut Stdout, line: &str) -> io::Result<()> {
    queue!(
        out,
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::CurrentLine),
        style::Print(line)
    )?;
    out.flush()
}
