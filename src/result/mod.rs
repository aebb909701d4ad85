pub mod buffered;
pub mod cursor;

pub use buffered::BufferedResult;
pub use cursor::{ResultCursor, StatementResult};
