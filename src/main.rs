fn main() -> anyhow::Result<()> {
    segment_player_lib::run()
}
