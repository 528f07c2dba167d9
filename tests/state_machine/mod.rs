mod lifecycle;
mod ownership;
