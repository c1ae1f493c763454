/// Outer controller that owns the worker's service lifetime.
///
/// The worker only signals; starting/stopping the surrounding service is up
/// to the implementation. All three must be cheap and callable from the
/// worker thread.
pub trait LifecycleController: Send + Sync {
    /// New work arrived while the worker had been marked idle.
    fn start_keep_alive(&self);

    /// The worker was marked idle and stayed idle until its queue drained.
    ///
    /// Called with the worker's idle flag locked: calling back into
    /// `submit` or `mark_idle` from here deadlocks.
    fn stop_if_idle(&self);

    /// The idle timer expired while push delivery is registered.
    fn fully_idle(&self);
}
