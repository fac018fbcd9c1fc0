//! Cross-crate tests for the WMI engine.


#[cfg(test)]
mod send_path;

#[cfg(test)]
mod dispatch;

#[cfg(test)]
mod lifecycle;

#[cfg(test)]
mod native_e2e;
