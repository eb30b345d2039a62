//! REST API server for remote control of the playback engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────┐       mpsc::channel        ┌──────────────────────┐
//! │   API Server Thread     │  ───── ApiCommand ──────▶  │   Tick Loop          │
//! │   (rouille HTTP)        │                            │   (main thread)      │
//! │                         │                            │                      │
//! │  POST /api/player/play  │  ──▶ ApiCommand::Play ──▶  │  scheduler.play()    │
//! │  POST /api/player/seek/ │  ──▶ Seek(ms) ─────────▶   │  scheduler.seek(ms)  │
//! └─────────────────────────┘                            └──────────────────────┘
//!          │                                                      │
//!          │  Arc<SharedApiState>                                 │
//!          │◀──────────── read snapshots ─────────────────────────│
//!          │                                             updates each tick
//!          │  Arc<FrameService> (thread-safe, read directly)
//! ```
//!
//! - **rouille** - sync HTTP server
//! - **mpsc channel** - transport commands to the tick loop, which owns the scheduler
//! - **SharedApiState** - playback snapshots written by the tick loop
//!
//! # Endpoints
//!
//! | Method | Path                          | Description                     |
//! |--------|-------------------------------|---------------------------------|
//! | GET    | `/api/health`                 | Health check                    |
//! | GET    | `/api/status`                 | Playback state, tracks, cache   |
//! | GET    | `/api/stats`                  | Interpolation statistics        |
//! | GET    | `/api/gaps`                   | Gap map                         |
//! | GET    | `/api/frame/{n}`              | One frame record                |
//! | GET    | `/api/frames?start=a&end=b`   | Frame records over `[a, b)`     |
//! | POST   | `/api/player/play`            | Start playback                  |
//! | POST   | `/api/player/pause`           | Pause playback                  |
//! | POST   | `/api/player/stop`            | Stop (pause + time 0)           |
//! | POST   | `/api/player/toggle-loop`     | Toggle loop mode                |
//! | POST   | `/api/player/seek/{ms}`       | Seek to virtual time            |
//! | POST   | `/api/player/speed/{s}`       | Set speed (negative = reverse)  |
//! | POST   | `/api/player/step/{+1,-1}`    | Step one frame                  |

mod api;

pub use api::{ApiCommand, ApiServer, SharedApiState, StatusResponse};
