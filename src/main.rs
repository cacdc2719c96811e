fn main() -> anyhow::Result<()> {
    attendance_lib::run()
}
