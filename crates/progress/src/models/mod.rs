mod progress;

pub use self::progress::ReadingProgress;
pub(crate) use self::progress::ProgressRow;
