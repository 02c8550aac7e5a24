fn main() -> anyhow::Result<()> {
    annocanvas::run()
}
