pub mod miheater;
