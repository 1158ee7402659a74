fn main() -> anyhow::Result<()> {
    folio::cli::run()
}
