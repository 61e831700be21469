mod buffer;
mod channel;
mod mock;
mod sequence;
