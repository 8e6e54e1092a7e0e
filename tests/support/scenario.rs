//! Unwraps `rstest-bdd` world fixtures inside scenario functions.

use color_eyre::eyre::Result;

/// Returns the fixture value, panicking with `label` when the world could
/// not be built so scenario bodies stay one line long.
///
/// # Examples
///
/// ```rust,ignore
/// let world = expect_fixture(Ok(7), "provisioning world");
/// assert_eq!(world, 7);
/// ```
pub fn expect_fixture<T>(fixture: Result<T>, label: &str) -> T {
    fixture.unwrap_or_else(|err| panic!("{label} could not be built: {err:?}"))
}
