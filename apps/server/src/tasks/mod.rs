pub mod sanity_scan;
