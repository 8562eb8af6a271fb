/**
 * ============================================================================
 * RECORDING MODULE
 * ============================================================================
 *
 * PURPOSE: Record a remote slide deck to MP4 on a virtual X display
 *
 * SUBMODULES:
 * - types: Requests, job state machine, snapshots
 * - dependencies: Executable lookup before any resource is acquired
 * - process: Supervised child process wrapper
 * - display: Xvfb + optional window manager
 * - browser: Chrome launch and DevTools-protocol automation
 * - capture: ffmpeg x11grab encoder supervision
 * - scheduler: Timed slide advances
 * - upload: Object store publishing
 * - storage: Local artifact paths and stale file cleanup
 * - status: In-memory job table with bounded retention
 * - backend: Component traits + the system implementation
 * - coordinator: Admission gate and per-job state machine
 *
 * ARCHITECTURE:
 * 1. submit() validates the request and takes the single admission permit
 * 2. A background task walks the job through each stage in order
 * 3. Display, browser and encoder are released on every exit path
 * 4. The finished MP4 is uploaded and the local copy removed
 *
 * REQUIREMENTS:
 * - Xvfb, google-chrome (or chromium) and ffmpeg on PATH
 * - fluxbox or openbox optional
 *
 * ============================================================================
 */

pub mod backend;
pub mod browser;
pub mod capture;
pub mod coordinator;
pub mod dependencies;
pub mod display;
pub mod process;
pub mod scheduler;
pub mod status;
pub mod storage;
pub mod types;
pub mod upload;
