macro_rules! version {
    () => {
        env!("CARGO_PKG_VERSION")
    };

    ($prefix:expr) => {
        concat!($prefix, env!("CARGO_PKG_VERSION"))
    };
}
