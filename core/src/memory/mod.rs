pub mod budget;

pub use budget::MemoryBudget;
