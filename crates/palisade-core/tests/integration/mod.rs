mod common;
mod control_plane_tests;
