pub mod render;
pub mod view;

pub use view::{ChannelMessageView, PAGE_SIZE};
