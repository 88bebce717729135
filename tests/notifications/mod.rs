mod local_cache;
mod subtree_watch;
