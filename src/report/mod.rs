pub mod history;
pub mod plot;

pub use history::write_history_csv;
pub use plot::{plot_confusion_matrix, plot_metric_curves};
