use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::Stylize,
    symbols::border,
    text::{Line, Text},
    widgets::{Block, Paragraph, Widget},
};
use std::fmt::Display;

use tracing::{debug, trace};

use loadscope::runner::sampler::Readings;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) enum MetricType {
    #[default]
    CoreLoad,
    MemoryUsage,
}

impl Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let val = match self {
            MetricType::CoreLoad => "CPU Load Per Core (%)",
            MetricType::MemoryUsage => "Memory And Swap (%)",
        };

        write!(f, "{}", val)
    }
}

#[derive(Debug, Default, Clone)]
pub(super) struct Chart {
    pub(super) metric_type: MetricType,
    pub(super) readings: Readings,
}

impl Widget for &Chart {
    fn render(self, area: Rect, buf: &mut Buffer)
    where
        Self: Sized,
    {
        let title = match (self.metric_type, self.readings.cpu.as_ref().and_then(|c| c.aggregate)) {
            (MetricType::CoreLoad, Some(aggregate)) => format!("{} - total {aggregate}%", self.metric_type),
            _ => format!("{}", self.metric_type),
        };
        let block = Block::bordered()
            .title(Line::from(title).bold().centered())
            .border_set(border::ROUNDED);

        let inner_area = block.inner(area);
        block.render(area, buf);

        let inner_layout = Layout::new(
            Direction::Vertical,
            vec![Constraint::Min(3), Constraint::Length(1)],
        )
        .split(inner_area);

        Paragraph::new(Text::from(vec![Line::from(self.footer().yellow())]))
            .centered()
            .render(inner_layout[1], buf);

        let bars = self.bars();
        if bars.is_empty() {
            debug!(?self.metric_type, "No data to render yet");
            Paragraph::new(Line::from("Waiting for the second sample...").italic())
                .centered()
                .render(inner_layout[0], buf);
            return;
        }

        self.render_bars(inner_layout[0], &bars, buf);
    }
}

impl Chart {
    pub(super) fn new(metric_type: MetricType, readings: Readings) -> Self {
        Self {
            metric_type,
            readings,
        }
    }

    /// Label and percentage of every bar, left to right
    pub(super) fn bars(&self) -> Vec<(String, u8)> {
        match self.metric_type {
            MetricType::CoreLoad => self
                .readings
                .cpu
                .as_ref()
                .map(|cpu| cpu.cores.iter().map(|(core, percent)| (core.to_string(), *percent)).collect())
                .unwrap_or_default(),
            MetricType::MemoryUsage => self
                .readings
                .memory
                .map(|memory| {
                    vec![
                        ("mem".to_string(), memory.used_percent().round() as u8),
                        ("swp".to_string(), memory.swap_percent().round() as u8),
                    ]
                })
                .unwrap_or_default(),
        }
    }

    fn footer(&self) -> String {
        if let Some(error) = &self.readings.last_error {
            return error.clone();
        }
        match (self.metric_type, self.readings.memory) {
            (MetricType::MemoryUsage, Some(memory)) => format!(
                "used {} kB / available {} kB / total {} kB / swap {} kB",
                memory.used_kb, memory.available_kb, memory.total_kb, memory.swap_used_kb
            ),
            _ => self
                .readings
                .updated_at
                .map(|at| format!("Updated {}", at.format("%H:%M:%S")))
                .unwrap_or_default(),
        }
    }

    fn render_bars(&self, area: Rect, bars: &[(String, u8)], buf: &mut Buffer) {
        if area.height < 3 || area.width == 0 {
            return;
        }

        // Two rows are reserved for the value above and the label below each bar
        let available_height = area.height.saturating_sub(2);
        let bar_width = (area.width / bars.len() as u16).max(1);
        let gap: u16 = if bar_width > 2 { 1 } else { 0 };

        for (i, (label, percent)) in bars.iter().enumerate() {
            let x = area.x + i as u16 * bar_width;
            if x >= area.x + area.width {
                trace!(%label, "Bar does not fit, skipping");
                break;
            }
            let width = bar_width.saturating_sub(gap).min(area.x + area.width - x);
            let height = resolve_height(*percent, available_height);

            let bar = Rect::new(x, area.y + 1 + available_height - height, width, height);
            let fill = "█".repeat(width as usize);
            let lines: Vec<Line> = (0..height)
                .map(|_| match self.metric_type {
                    MetricType::CoreLoad if *percent >= 80 => Line::from(fill.clone().red()),
                    MetricType::CoreLoad => Line::from(fill.clone().blue()),
                    MetricType::MemoryUsage => Line::from(fill.clone().yellow()),
                })
                .collect();
            Paragraph::new(Text::from(lines)).render(bar, buf);

            let value_rect = Rect::new(x, bar.y.saturating_sub(1).max(area.y), width, 1);
            Paragraph::new(Line::from(percent.to_string()).yellow().centered()).render(value_rect, buf);

            let mut label = label.clone();
            label.truncate(width.into());
            let label_rect = Rect::new(x, area.y + area.height - 1, width, 1);
            Paragraph::new(Line::from(label).centered()).render(label_rect, buf);
        }
    }
}

/// Rows filled for `percent` out of `available` rows; any non-zero load shows at least one row
fn resolve_height(percent: u8, available: u16) -> u16 {
    let height = (u32::from(percent.min(100)) * u32::from(available) / 100) as u16;
    if percent > 0 { height.max(1).min(available) } else { height }
}
