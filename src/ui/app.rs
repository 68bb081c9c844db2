use ratatui::{
    DefaultTerminal, Frame,
    layout::{Constraint, Direction, Layout},
};
use std::error::Error;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::chart::{Chart, MetricType};
use loadscope::runner::sampler::Readings;

#[derive(Debug)]
struct App {
    current_page: Page,
    readings: Arc<RwLock<Readings>>,
    refresh: Duration,
    exit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    Overview,
    Cores,
    Memory,
}

impl Page {
    const ALL: [Page; 3] = [Page::Overview, Page::Cores, Page::Memory];

    fn offset(self, offset: isize) -> Page {
        let pos = Self::ALL.iter().position(|p| *p == self).unwrap_or_default() as isize;
        let len = Self::ALL.len() as isize;
        Self::ALL[(pos + offset).rem_euclid(len) as usize]
    }

    fn metrics(self) -> Vec<MetricType> {
        match self {
            Page::Overview => vec![MetricType::CoreLoad, MetricType::MemoryUsage],
            Page::Cores => vec![MetricType::CoreLoad],
            Page::Memory => vec![MetricType::MemoryUsage],
        }
    }
}

impl Display for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let val = match self {
            Page::Overview => "Overview",
            Page::Cores => "Cores",
            Page::Memory => "Memory",
        };

        write!(f, "{val}")
    }
}

/// Contains a complete view in the screen
#[derive(Debug)]
struct View {
    charts: Vec<Chart>,
    layout: Layout,
}

impl View {
    fn new(page: Page, readings: &Readings) -> Self {
        let charts: Vec<Chart> = page
            .metrics()
            .into_iter()
            .map(|metric| Chart::new(metric, readings.clone()))
            .collect();

        let constraints = match charts.len() {
            1 => vec![Constraint::Percentage(100)],
            _ => vec![Constraint::Percentage(65), Constraint::Percentage(35)],
        };

        Self {
            charts,
            layout: Layout::new(Direction::Vertical, constraints),
        }
    }

    fn draw(&self, frame: &mut Frame) {
        for (chart, area) in self.charts.iter().zip(self.layout.split(frame.area()).iter()) {
            frame.render_widget(chart, *area);
        }
    }
}

impl App {
    fn new(readings: Arc<RwLock<Readings>>, refresh: Duration) -> Self {
        Self {
            current_page: Page::Overview,
            readings,
            refresh,
            exit: false,
        }
    }

    fn run(&mut self, terminal: &mut DefaultTerminal) -> std::io::Result<()> {
        while !self.exit {
            let view = View::new(self.current_page, &self.clone_readings());
            terminal.draw(|frame| view.draw(frame))?;
            self.handle_events()?;
        }

        Ok(())
    }

    fn handle_events(&mut self) -> std::io::Result<()> {
        // Poll with a timeout so the screen keeps refreshing without input
        if event::poll(self.refresh)? {
            match event::read()? {
                // crossterm also emits key release and repeat events on Windows.
                Event::Key(key_event) if key_event.kind == KeyEventKind::Press => self.handle_key_event(key_event),
                _ => {}
            };
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        match key_event.code {
            KeyCode::Char('q') | KeyCode::Esc => self.exit(),
            KeyCode::Left | KeyCode::Char('h') => self.change_page(-1),
            KeyCode::Right | KeyCode::Char('l') => self.change_page(1),
            _ => {}
        }
    }

    fn change_page(&mut self, offset: isize) {
        self.current_page = self.current_page.offset(offset);
        debug!("Changed to page {}", self.current_page);
    }

    fn clone_readings(&self) -> Readings {
        // The sampling task holds the write lock only for a swap, so waiting here is short.
        tokio::task::block_in_place(|| {
            let rt = tokio::runtime::Handle::current();
            rt.block_on(async { self.readings.read().await.clone() })
        })
    }

    fn exit(&mut self) {
        self.exit = true
    }
}

/// The live view needs a terminal on stdout; headless callers get an error instead of a panic
pub fn check_terminal(stdout_is_tty: bool) -> std::io::Result<()> {
    if stdout_is_tty {
        Ok(())
    } else {
        Err(std::io::Error::other(
            "the live view needs a terminal on stdout, use `loadscope cpu` when running headless",
        ))
    }
}

/// Run the live view until the user quits; must be called inside a multi-threaded runtime
pub fn render_app(readings: Arc<RwLock<Readings>>, refresh: Duration) -> Result<(), Box<dyn Error>> {
    trace!("Rendering app");

    let mut terminal = ratatui::try_init()?;
    let app_result = App::new(readings, refresh).run(&mut terminal);
    ratatui::restore();
    app_result?;
    Ok(())
}
