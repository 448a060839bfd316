mod decoding;
mod persistence;
mod sessions;
