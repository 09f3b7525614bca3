//! Well-known in-container paths, named but not enumerated by spec.md §4.5. Values follow the
//! reference implementation's `cc_core/commons/red_to_restricted_red.py` constants.

/// Shared named volume mount point for the three containers of a single batch.
pub const SHARED_VOLUME_MOUNT: &str = "/cc";

/// Where the restricted-red agent archive is injected in the stage-in/stage-out containers.
pub const AGENT_ARCHIVE_ROOT: &str = "/";

/// Entry point executed inside the stage-in container.
pub const INPUT_CONNECTOR_ENTRY_POINT: &str = "/cc_input_connector.py";

/// Entry point executed inside the stage-out container.
pub const OUTPUT_CONNECTOR_ENTRY_POINT: &str = "/cc_output_connector.py";

/// FUSE device required inside a mounting batch's containers.
pub const FUSE_DEVICE: &str = "/dev/fuse";

/// Linux capability required alongside the FUSE device.
pub const SYS_ADMIN_CAPABILITY: &str = "SYS_ADMIN";
