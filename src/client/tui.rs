//! Full-screen chat UI.
//!
//! A scrolling transcript above a single-line input box.

use super::session::{classify, Input as Command, Session};
use super::socket::Client;
use anyhow::Result;
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::{Stream, StreamExt};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use std::future::Future;
use std::io::{self, Stdout};
use tui_input::backend::crossterm::EventHandler;
use tui_input::Input;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Speaker {
    You,
    Qwen,
    Notice,
    Error,
}

impl Speaker {
    fn label(self) -> &'static str {
        match self {
            Speaker::You => "you: ",
            Speaker::Qwen => "qwen: ",
            Speaker::Notice => "",
            Speaker::Error => "error: ",
        }
    }

    fn style(self) -> Style {
        let color = match self {
            Speaker::You => Color::Blue,
            Speaker::Qwen => Color::Green,
            Speaker::Notice => Color::Yellow,
            Speaker::Error => Color::Red,
        };
        Style::default().fg(color).add_modifier(Modifier::BOLD)
    }
}

#[derive(Debug)]
struct Entry {
    speaker: Speaker,
    text: String,
}

/// Everything the UI draws.
#[derive(Default)]
struct ChatView {
    entries: Vec<Entry>,
    input: Input,
    busy: bool,
}

impl ChatView {
    fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.entries.push(Entry {
            speaker,
            text: text.into(),
        });
    }

    fn append_to_last(&mut self, chunk: &str) {
        if let Some(entry) = self.entries.last_mut() {
            entry.text.push_str(chunk);
        }
    }

    /// Remove a reply placeholder that never received text.
    fn drop_empty_reply(&mut self) {
        if self
            .entries
            .last()
            .is_some_and(|e| e.speaker == Speaker::Qwen && e.text.is_empty())
        {
            self.entries.pop();
        }
    }

    fn transcript(&self) -> Vec<Line<'_>> {
        let mut lines = Vec::new();
        for entry in &self.entries {
            let mut text_lines = entry.text.split('\n');
            let first = text_lines.next().unwrap_or_default();
            let body_style = match entry.speaker {
                Speaker::Notice => entry.speaker.style(),
                Speaker::Error => Style::default().fg(Color::Red),
                _ => Style::default(),
            };
            lines.push(Line::from(vec![
                Span::styled(entry.speaker.label(), entry.speaker.style()),
                Span::styled(first, body_style),
            ]));
            lines.extend(text_lines.map(|l| Line::from(Span::styled(l, body_style))));
        }
        lines
    }
}

/// Run the chat UI until the operator leaves.
pub async fn run_chat_tui(client: &Client, stream: bool) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = chat_loop(&mut terminal, client, stream).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn chat_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    client: &Client,
    stream: bool,
) -> Result<()> {
    let mut view = ChatView::default();
    let mut session = Session::new();
    let mut events = EventStream::new();
    view.push(
        Speaker::Notice,
        "Qwen chat. Enter sends, 'clear' resets the conversation, Esc or 'exit' quits.",
    );

    loop {
        terminal.draw(|frame| draw_ui(frame, &view))?;

        let Some(event) = events.next().await else {
            return Ok(());
        };
        let Event::Key(key) = event? else {
            continue;
        };
        // Only handle key press events (not release)
        if key.kind != KeyEventKind::Press {
            continue;
        }
        if is_quit(&key) {
            return Ok(());
        }

        match key.code {
            KeyCode::Enter => {
                let line = view.input.value().to_string();
                view.input.reset();

                match classify(&line) {
                    Command::Empty => {}
                    Command::Exit => return Ok(()),
                    Command::Clear => {
                        session.clear();
                        view.entries.clear();
                        view.push(Speaker::Notice, "History cleared");
                    }
                    Command::Prompt(prompt) => {
                        view.push(Speaker::You, prompt.clone());
                        session.begin_turn(prompt);
                        view.push(Speaker::Qwen, "");
                        view.busy = true;
                        terminal.draw(|frame| draw_ui(frame, &view))?;

                        let request = client.chat(session.history(), stream, |chunk| {
                            view.append_to_last(chunk);
                            terminal.draw(|frame| draw_ui(frame, &view))?;
                            Ok(())
                        });
                        let Some(result) = unless_quit(request, &mut events).await? else {
                            session.abandon_turn();
                            return Ok(());
                        };
                        view.busy = false;

                        match result {
                            Ok(reply) => session.finish_turn(reply.text),
                            Err(e) => {
                                session.abandon_turn();
                                view.drop_empty_reply();
                                view.push(Speaker::Error, format!("{:#}", e));
                            }
                        }
                    }
                }
            }
            _ => {
                // Handle other input events
                view.input.handle_event(&Event::Key(key));
            }
        }
    }
}

/// Esc, Ctrl-C and Ctrl-D leave the chat. Raw mode turns Ctrl-C into a key.
fn is_quit(key: &KeyEvent) -> bool {
    match key.code {
        KeyCode::Esc => true,
        KeyCode::Char('c') | KeyCode::Char('d') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Drive `request` while watching the keyboard. `None` means the operator
/// quit before it finished; other keys pressed meanwhile are dropped.
async fn unless_quit<T, S>(request: impl Future<Output = T>, events: &mut S) -> io::Result<Option<T>>
where
    S: Stream<Item = io::Result<Event>> + Unpin,
{
    tokio::pin!(request);
    let mut keyboard_open = true;
    loop {
        tokio::select! {
            result = &mut request => return Ok(Some(result)),
            event = events.next(), if keyboard_open => match event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press && is_quit(&key) => {
                    return Ok(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
                None => keyboard_open = false,
            },
        }
    }
}

/// Scroll offset that pins the last wrapped row of `paragraph` to the bottom
/// of `area`. Rows are counted by the same word wrapper that renders them.
fn bottom_scroll(paragraph: &Paragraph<'_>, area: Rect) -> u16 {
    let rows = paragraph.line_count(area.width);
    let overflow = rows.saturating_sub(usize::from(area.height));
    u16::try_from(overflow).unwrap_or(u16::MAX)
}

/// Draw the TUI.
fn draw_ui(frame: &mut Frame, view: &ChatView) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(3)])
        .split(frame.area());

    // Transcript, pinned to the newest line
    let transcript_block = Block::default()
        .title(" qwen ")
        .title_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    let transcript_area = transcript_block.inner(chunks[0]);
    let transcript = Paragraph::new(view.transcript()).wrap(Wrap { trim: false });
    let scroll = bottom_scroll(&transcript, transcript_area);
    frame.render_widget(transcript.block(transcript_block).scroll((scroll, 0)), chunks[0]);

    // Input box
    let title = if view.busy { " waiting for reply... " } else { " message " };
    let input_block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    let inner_area = input_block.inner(chunks[1]);
    frame.render_widget(input_block, chunks[1]);

    // Calculate visible portion of input
    let input_width = usize::from(inner_area.width.max(1));
    let value = view.input.value();
    let cursor_pos = view.input.visual_cursor();

    // Scroll the input if cursor is beyond visible area
    let scroll = (cursor_pos + 1).saturating_sub(input_width);

    let visible_value: String = value.chars().skip(scroll).take(input_width).collect();
    let input_paragraph = Paragraph::new(Line::from(vec![Span::styled(
        visible_value,
        Style::default().fg(Color::White),
    )]));
    frame.render_widget(input_paragraph, inner_area);

    if !view.busy && inner_area.width > 0 {
        let cursor_x = inner_area.x + (cursor_pos - scroll) as u16;
        frame.set_cursor_position((cursor_x, inner_area.y));
    }
}
