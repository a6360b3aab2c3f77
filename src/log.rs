//! Logging macros used throughout the library.
//!
//! On target every message goes out over `defmt`. Host tests have no global
//! defmt logger to link against, so there the same messages are printed
//! through `std`. Format strings must therefore stick to `{}` and `{:?}`.

macro_rules! trace {
    ($($arg:tt)*) => {{
        #[cfg(not(test))]
        defmt::trace!($($arg)*);
        #[cfg(test)]
        std::println!($($arg)*);
    }};
}

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(not(test))]
        defmt::debug!($($arg)*);
        #[cfg(test)]
        std::println!($($arg)*);
    }};
}

macro_rules! info {
    ($($arg:tt)*) => {{
        #[cfg(not(test))]
        defmt::info!($($arg)*);
        #[cfg(test)]
        std::println!($($arg)*);
    }};
}

macro_rules! warn {
    ($($arg:tt)*) => {{
        #[cfg(not(test))]
        defmt::warn!($($arg)*);
        #[cfg(test)]
        std::println!($($arg)*);
    }};
}

macro_rules! error {
    ($($arg:tt)*) => {{
        #[cfg(not(test))]
        defmt::error!($($arg)*);
        #[cfg(test)]
        std::println!($($arg)*);
    }};
}
