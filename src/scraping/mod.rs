pub mod browser_manager;
pub mod cdp;
pub mod driver;
pub mod extract;
pub mod page;
pub mod resolver;
pub mod selectors;

#[cfg(test)]
pub(crate) mod testing;
