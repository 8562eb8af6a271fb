/**
 * ============================================================================
 * BROWSER MODULE
 * ============================================================================
 *
 * PURPOSE: Chrome automation over the DevTools protocol
 *
 * SUBMODULES:
 * - cdp: WebSocket JSON-RPC client (commands + event stream)
 * - keys: Key name -> key event descriptor table
 * - session: Launch, navigate, prime, advance, close
 *
 * ============================================================================
 */

pub mod cdp;
pub mod keys;
pub mod session;

pub use session::BrowserSession;
