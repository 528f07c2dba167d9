mod job_controller;
mod job_signals;
mod reconciler;
