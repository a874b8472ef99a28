mod tests_itree;
mod tests_refresh;
