//! Handle lifecycle: retain/release balance, stale detection, slot reuse
