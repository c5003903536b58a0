pub enum ReloaderEvent {
    /// Time to run one controller tick.
    Tick,
    /// Something under the work tree changed on disk; snapshot early.
    FilesTouched,
    /// Ctrl+C (or SIGTERM) received; stop the child and exit.
    Shutdown,
}
