mod chart;
mod html;

pub use chart::{ChartRenderer, PieChartRenderer, outcome_color};
pub use html::{ChartSection, HtmlReport, escape_html, render_html};
