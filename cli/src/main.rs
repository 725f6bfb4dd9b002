fn main() -> anyhow::Result<()> {
    authdocs_cli::run()
}
