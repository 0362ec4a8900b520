//! Reader-app library schema and fixed row defaults.
//!
//! A supplied template database is preferred; `BLANK_LIBRARY` creates the
//! subset of tables the materializer writes when none is configured.

pub const BLANK_LIBRARY: &str = "
CREATE TABLE IF NOT EXISTS Setlists (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    Name TEXT NOT NULL,
    LastPage INTEGER,
    LastIndex INTEGER,
    SortBy INTEGER,
    Ascending INTEGER,
    DateCreated INTEGER,
    LastModified INTEGER
);

CREATE TABLE IF NOT EXISTS Songs (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    Title TEXT NOT NULL,
    Difficulty INTEGER,
    LastPage INTEGER,
    OrientationLock INTEGER,
    Duration INTEGER,
    Stars INTEGER,
    VerticalZoom REAL,
    Sharpen INTEGER,
    SharpenLevel INTEGER,
    CreationDate INTEGER,
    LastModified INTEGER,
    Keywords TEXT,
    AutoStartAudio INTEGER,
    SongId INTEGER
);

CREATE TABLE IF NOT EXISTS Files (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    SongId INTEGER,
    Path TEXT,
    PageOrder TEXT,
    FileSize INTEGER,
    LastModified INTEGER,
    Source INTEGER,
    Type INTEGER,
    SourceFilePageCount INTEGER,
    FileHash INTEGER,
    Width INTEGER,
    Height INTEGER
);

CREATE TABLE IF NOT EXISTS AutoScroll (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    SongId INTEGER,
    Behavior INTEGER,
    PauseDuration INTEGER,
    Speed INTEGER,
    FixedDuration INTEGER,
    ScrollPercent INTEGER,
    ScrollOnLoad INTEGER,
    TimeBeforeScroll INTEGER
);

CREATE TABLE IF NOT EXISTS Crop (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    SongId INTEGER,
    Page INTEGER,
    Left INTEGER,
    Top INTEGER,
    Right INTEGER,
    Bottom INTEGER,
    Rotation INTEGER
);

CREATE TABLE IF NOT EXISTS ZoomPerPage (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    SongId INTEGER,
    Page INTEGER,
    Zoom REAL,
    PortPanX INTEGER,
    PortPanY INTEGER,
    LandZoom REAL,
    LandPanX INTEGER,
    LandPanY INTEGER,
    FirstHalfY INTEGER,
    SecondHalfY INTEGER
);

CREATE TABLE IF NOT EXISTS MetronomeSettings (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    SongId INTEGER,
    Sig1 INTEGER,
    Sig2 INTEGER,
    Subdivision INTEGER,
    SoundFX INTEGER,
    AccentFirst INTEGER,
    AutoStart INTEGER,
    CountIn INTEGER,
    NumberCount INTEGER,
    AutoTurn INTEGER
);

CREATE TABLE IF NOT EXISTS MetronomeBeatsPerPage (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    SongId INTEGER,
    Page INTEGER,
    BeatsPerPage INTEGER
);

CREATE TABLE IF NOT EXISTS SetlistSong (
    Id INTEGER PRIMARY KEY AUTOINCREMENT,
    SetlistId INTEGER,
    SongId INTEGER
);
";

// ============================================================================
// Insert Statements
// ============================================================================

pub const INSERT_SETLIST: &str = "INSERT INTO Setlists (Id, Name, LastPage, LastIndex, SortBy, Ascending, DateCreated, LastModified)
     VALUES (?1, ?2, 0, 0, 0, 1, ?3, ?3)";

pub const INSERT_SONG: &str = "INSERT INTO Songs (Id, Title, Difficulty, LastPage, OrientationLock, Duration, Stars, VerticalZoom, Sharpen, SharpenLevel, CreationDate, LastModified, Keywords, AutoStartAudio, SongId)
     VALUES (?1, ?2, 0, 0, 0, 0, 0, 1.0, 0, 7, ?3, ?4, '', 0, 0)";

pub const INSERT_FILE: &str = "INSERT INTO Files (SongId, Path, PageOrder, FileSize, LastModified, Source, Type, SourceFilePageCount, FileHash, Width, Height)
     VALUES (?1, ?2, ?3, ?4, ?5, 1, 1, ?6, ?7, -1, -1)";

pub const INSERT_AUTOSCROLL: &str = "INSERT INTO AutoScroll (SongId, Behavior, PauseDuration, Speed, FixedDuration, ScrollPercent, ScrollOnLoad, TimeBeforeScroll)
     VALUES (?1, 0, 8000, 3, 1000, 20, 0, 2000)";

pub const INSERT_CROP: &str = "INSERT INTO Crop (SongId, Page, Left, Top, Right, Bottom, Rotation)
     VALUES (?1, ?2, 0, 0, 0, 0, 0)";

pub const INSERT_ZOOM: &str = "INSERT INTO ZoomPerPage (SongId, Page, Zoom, PortPanX, PortPanY, LandZoom, LandPanX, LandPanY, FirstHalfY, SecondHalfY)
     VALUES (?1, ?2, 100.0, 0, 0, 100.0, 0, 0, 0, 0)";

pub const INSERT_METRONOME: &str = "INSERT INTO MetronomeSettings (SongId, Sig1, Sig2, Subdivision, SoundFX, AccentFirst, AutoStart, CountIn, NumberCount, AutoTurn)
     VALUES (?1, 2, 0, 0, 0, 0, 0, 0, 1, 0)";

pub const INSERT_BEATS: &str = "INSERT INTO MetronomeBeatsPerPage (SongId, Page, BeatsPerPage)
     VALUES (?1, ?2, 0)";

pub const INSERT_SETLIST_SONG: &str = "INSERT INTO SetlistSong (SetlistId, SongId) VALUES (?1, ?2)";

/// Per-page tables filled with the fixed default row for every page.
pub const PER_PAGE_INSERTS: [&str; 3] = [INSERT_CROP, INSERT_ZOOM, INSERT_BEATS];
