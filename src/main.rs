//! Provisions a PostgreSQL role and database, then prints the role's
//! effective password.
//!
//! Configuration is read from `PGPROV_*` environment variables, command-line
//! flags and configuration files via
//! [`OrthoConfig`](https://github.com/leynos/ortho-config). Diagnostics go to
//! standard error. The binary exits with status code `0` on success and `1`
//! on error, naming the step that failed.

fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    pg_provision::run().map_err(|err| color_eyre::eyre::eyre!(err))?;
    Ok(())
}
