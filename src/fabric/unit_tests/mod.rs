#[cfg(test)]
mod bridge_tests;
#[cfg(test)]
mod fabric_tests;
