mod hot_reload;
